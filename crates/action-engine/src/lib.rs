//! Interaction strategy engine for pagecarbon.
//!
//! Given a discovered element, attempts an action through an ordered set of
//! independently fallible strategies, the whole attempt raced against a
//! caller-supplied timeout. Exhausting every strategy is reported, logged
//! and recovered from; a flaky element never aborts an analysis run.

pub mod invoke;
pub mod strategy;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use cdp_session::SessionError;

pub use crate::invoke::invoke;
pub use crate::strategy::{strategy_order, Strategy};

/// Why a single strategy attempt failed.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("page evaluation failed: {0}")]
    Session(#[from] SessionError),
}

/// Result of one `invoke` call. Created once, never mutated, discarded
/// after logging and aggregation.
#[derive(Clone, Debug, Serialize)]
pub struct InteractionOutcome {
    pub success: bool,
    /// Name of the strategy that succeeded, when one did.
    pub strategy: Option<&'static str>,
    /// Failure reason; for exhausted attempts this lists every strategy's
    /// reason, for deadline hits it is the distinct timed-out marker.
    pub reason: Option<String>,
    #[serde(with = "elapsed_ms")]
    pub elapsed: Duration,
    /// Whether network activity was observed during the settle wait.
    pub network_activity: bool,
}

impl InteractionOutcome {
    pub fn success(strategy: Strategy, elapsed: Duration, network_activity: bool) -> Self {
        Self {
            success: true,
            strategy: Some(strategy.name()),
            reason: None,
            elapsed,
            network_activity,
        }
    }

    pub fn failed(reason: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            strategy: None,
            reason: Some(reason),
            elapsed,
            network_activity: false,
        }
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            success: false,
            strategy: None,
            reason: Some("timed out".to_string()),
            elapsed,
            network_activity: false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.reason.as_deref() == Some("timed out")
    }
}

mod elapsed_ms {
    use super::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use network_tap::{NetworkMonitor, TapConfig};
    use parking_lot::Mutex;
    use perceiver_interactive::{DiscoverySource, ElementDescriptor, ElementRect};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::broadcast;

    use cdp_session::PageOps;

    type EvalHook = Box<dyn Fn(&str) -> Result<Value, SessionError> + Send + Sync>;

    struct ScriptedPage {
        on_evaluate: EvalHook,
        clicks: Mutex<Vec<(f64, f64)>>,
        evaluate_delay: Option<Duration>,
    }

    impl ScriptedPage {
        fn new(on_evaluate: EvalHook) -> Arc<Self> {
            Arc::new(Self {
                on_evaluate,
                clicks: Mutex::new(Vec::new()),
                evaluate_delay: None,
            })
        }
    }

    #[async_trait]
    impl PageOps for ScriptedPage {
        async fn navigate(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> Result<Value, SessionError> {
            if let Some(delay) = self.evaluate_delay {
                tokio::time::sleep(delay).await;
            }
            (self.on_evaluate)(expression)
        }

        async fn dispatch_click(&self, x: f64, y: f64) -> Result<(), SessionError> {
            self.clicks.lock().push((x, y));
            Ok(())
        }

        async fn insert_text(&self, _text: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn set_viewport(
            &self,
            _viewport: cdp_session::Viewport,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        fn network_events(&self) -> broadcast::Receiver<network_tap::NetworkEvent> {
            broadcast::channel(1).1
        }

        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn descriptor() -> ElementDescriptor {
        ElementDescriptor {
            selector: "button.buy".to_string(),
            tag: "button".to_string(),
            role: None,
            text: "Buy".to_string(),
            rect: ElementRect {
                x: 10.0,
                y: 10.0,
                width: 100.0,
                height: 30.0,
            },
            visible: true,
            disabled: false,
            has_click_handler: false,
            confidence: 0.9,
            source: DiscoverySource::Semantic,
        }
    }

    fn fast_monitor() -> Arc<NetworkMonitor> {
        NetworkMonitor::new(TapConfig {
            quiet_window: Duration::from_millis(20),
            max_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn script_dispatch_succeeds_when_native_cannot_resolve() {
        // Geometry lookup finds nothing; the synthetic dispatch works.
        let page = ScriptedPage::new(Box::new(|expression| {
            if expression.contains("getBoundingClientRect") && expression.contains("scrollIntoView")
            {
                Ok(Value::Null)
            } else {
                Ok(json!(true))
            }
        }));
        let monitor = fast_monitor();

        let outcome = invoke(page, &monitor, &descriptor(), Duration::from_secs(2)).await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy, Some("script"));
        assert!(outcome.reason.is_none());
    }

    #[tokio::test]
    async fn exhausted_strategies_aggregate_every_reason() {
        let mut d = descriptor();
        d.rect = ElementRect::default(); // no coordinate fallback
        let page = ScriptedPage::new(Box::new(|_| Ok(Value::Null)));
        let monitor = fast_monitor();

        let outcome = invoke(page, &monitor, &d, Duration::from_secs(2)).await;
        assert!(!outcome.success);
        let reason = outcome.reason.expect("aggregated reason");
        assert!(reason.contains("native:"));
        assert!(reason.contains("script:"));
        assert!(reason.contains("text:"));
        assert!(!reason.contains("coordinate:"));
    }

    #[tokio::test]
    async fn deadline_produces_distinct_timeout_outcome() {
        let page = Arc::new(ScriptedPage {
            on_evaluate: Box::new(|_| Ok(Value::Null)),
            clicks: Mutex::new(Vec::new()),
            evaluate_delay: Some(Duration::from_secs(5)),
        });
        let monitor = fast_monitor();

        let started = Instant::now();
        let outcome = invoke(page, &monitor, &descriptor(), Duration::from_millis(100)).await;
        assert!(!outcome.success);
        assert!(outcome.is_timeout());
        // Bounded by the timeout plus a small fixed overhead.
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn coordinate_click_uses_recorded_center() {
        // Every in-page attempt fails; only the raw pointer click lands.
        let page = ScriptedPage::new(Box::new(|_| Ok(json!(false))));
        let monitor = fast_monitor();

        let outcome = invoke(
            page.clone(),
            &monitor,
            &descriptor(),
            Duration::from_secs(2),
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.strategy, Some("coordinate"));
        assert_eq!(*page.clicks.lock(), vec![(60.0, 25.0)]);
    }

    #[tokio::test]
    async fn settle_wait_reports_triggered_activity() {
        let page = ScriptedPage::new(Box::new(|_| Ok(json!(true))));
        let monitor = fast_monitor();

        // Feed a transfer while the settle wait is running.
        let feeder = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                monitor.ingest(network_tap::NetworkEvent::RequestWillBeSent {
                    request_id: pagecarbon_core_types::RequestId("r1".to_string()),
                    url: "https://example.com/lazy.js".to_string(),
                });
            })
        };

        let outcome = invoke(page, &monitor, &descriptor(), Duration::from_secs(1)).await;
        feeder.await.unwrap();
        assert!(outcome.success);
        assert!(outcome.network_activity);
    }
}
