//! User behavior simulation for pagecarbon.
//!
//! Replays the kinds of activity a human visitor produces after a page
//! settles: incremental scrolling with lazy-load awareness, hovering and
//! focusing interactive elements, typing into inputs and cycling viewport
//! sizes. Everything here is best effort; a failing sub-step is recorded
//! in the report and the sequence keeps going.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use cdp_session::{PageOps, Viewport};
use perceiver_interactive::ElementDescriptor;

/// Bounds and pacing for every simulated behavior.
#[derive(Clone, Debug)]
pub struct BehaviorConfig {
    /// Hard cap on scroll steps, lazy-load growth included.
    pub max_scroll_steps: usize,
    /// Randomized pause between scroll steps, inclusive bounds.
    pub scroll_pause: (Duration, Duration),
    pub return_to_top: bool,
    pub max_hover_targets: usize,
    pub hover_pause: Duration,
    pub max_focus_targets: usize,
    /// Text inserted into each probed input field.
    pub typing_text: String,
    pub max_typing_targets: usize,
    /// Alternate sizes applied by the viewport cycle.
    pub viewport_sizes: Vec<Viewport>,
    pub viewport_hold: Duration,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_scroll_steps: 8,
            scroll_pause: (Duration::from_millis(150), Duration::from_millis(400)),
            return_to_top: true,
            max_hover_targets: 5,
            hover_pause: Duration::from_millis(200),
            max_focus_targets: 5,
            typing_text: "sample query".to_string(),
            max_typing_targets: 3,
            viewport_sizes: vec![
                Viewport {
                    width: 768,
                    height: 1024,
                    device_scale_factor: 1.0,
                    mobile: false,
                },
                Viewport {
                    width: 1920,
                    height: 1080,
                    device_scale_factor: 1.0,
                    mobile: false,
                },
            ],
            viewport_hold: Duration::from_millis(300),
        }
    }
}

/// Outcome of one behavior pass. Failures carry human-readable reasons
/// for the log; they never abort a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BehaviorReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<String>,
}

impl BehaviorReport {
    fn record<E: std::fmt::Display>(&mut self, step: &str, result: Result<(), E>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(err) => {
                warn!(target: "behavior-sim", step, %err, "behavior step failed");
                self.failures.push(format!("{step}: {err}"));
            }
        }
    }

    pub fn merge(&mut self, other: BehaviorReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

fn jittered(bounds: (Duration, Duration)) -> Duration {
    let (min, max) = bounds;
    if max <= min {
        return min;
    }
    let millis = {
        let mut rng = rand::thread_rng();
        rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64)
    };
    Duration::from_millis(millis)
}

const MEASURE_HEIGHTS: &str = "(() => ({ page: document.documentElement.scrollHeight, view: window.innerHeight }))()";

fn decode_heights(payload: &Value) -> Option<(u64, u64)> {
    let page = payload.get("page").and_then(Value::as_f64)?;
    let view = payload.get("view").and_then(Value::as_f64)?;
    if page <= 0.0 || view <= 0.0 {
        return None;
    }
    Some((page as u64, view as u64))
}

fn steps_for(page_height: u64, view_height: u64, cap: usize) -> usize {
    let needed = page_height.div_ceil(view_height).saturating_sub(1);
    (needed as usize).min(cap)
}

/// Scroll the page one viewport at a time.
///
/// The step count comes from the measured page height; after every step
/// the height is re-measured so lazy-loaded content extends the walk,
/// still bounded by `max_scroll_steps`.
pub async fn simulate_scrolling(page: &Arc<dyn PageOps>, config: &BehaviorConfig) -> BehaviorReport {
    let mut report = BehaviorReport::default();

    let (page_height, view_height) = match page.evaluate(MEASURE_HEIGHTS).await {
        Ok(payload) => match decode_heights(&payload) {
            Some(heights) => heights,
            None => {
                report.record::<&str>("measure", Err("page reported no usable geometry"));
                return report;
            }
        },
        Err(err) => {
            report.record("measure", Err(err));
            return report;
        }
    };

    let mut steps = steps_for(page_height, view_height, config.max_scroll_steps);
    debug!(
        target: "behavior-sim",
        page_height,
        view_height,
        steps,
        "scroll walk planned"
    );

    let mut step = 0usize;
    while step < steps {
        step += 1;
        let target = view_height * step as u64;
        let result = page
            .evaluate(&format!("window.scrollTo(0, {target})"))
            .await
            .map(|_| ());
        report.record(&format!("scroll step {step}"), result);

        tokio::time::sleep(jittered(config.scroll_pause)).await;

        // Lazy-loaded content grows the document under us.
        if let Ok(payload) = page.evaluate(MEASURE_HEIGHTS).await {
            if let Some((grown, _)) = decode_heights(&payload) {
                if grown > page_height {
                    let extended = steps_for(grown, view_height, config.max_scroll_steps);
                    if extended > steps {
                        debug!(target: "behavior-sim", grown, extended, "page grew during scroll");
                        steps = extended;
                    }
                }
            }
        }
    }

    if config.return_to_top && steps > 0 {
        let result = page.evaluate("window.scrollTo(0, 0)").await.map(|_| ());
        report.record("return to top", result);
    }

    report
}

/// Dispatch hover events over the first few descriptors.
pub async fn simulate_hover(
    page: &Arc<dyn PageOps>,
    elements: &[ElementDescriptor],
    config: &BehaviorConfig,
) -> BehaviorReport {
    let mut report = BehaviorReport::default();

    for descriptor in elements.iter().take(config.max_hover_targets) {
        let expression = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) return false;
    for (const type of ["mouseenter", "mouseover", "mousemove"]) {{
        el.dispatchEvent(new MouseEvent(type, {{ bubbles: true, cancelable: true, view: window }}));
    }}
    return true;
}})()"#,
            selector = js_string(&descriptor.selector),
        );
        let result = match page.evaluate(&expression).await {
            Ok(payload) if payload.as_bool() == Some(true) => Ok(()),
            Ok(_) => Err(format!("'{}' no longer present", descriptor.selector)),
            Err(err) => Err(err.to_string()),
        };
        report.record(&format!("hover {}", descriptor.selector), result);
        tokio::time::sleep(config.hover_pause).await;
    }

    report
}

/// Focus then blur the first few descriptors.
pub async fn simulate_focus(
    page: &Arc<dyn PageOps>,
    elements: &[ElementDescriptor],
    config: &BehaviorConfig,
) -> BehaviorReport {
    let mut report = BehaviorReport::default();

    for descriptor in elements.iter().take(config.max_focus_targets) {
        let expression = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el || typeof el.focus !== "function") return false;
    el.focus();
    el.blur && el.blur();
    return true;
}})()"#,
            selector = js_string(&descriptor.selector),
        );
        let result = match page.evaluate(&expression).await {
            Ok(payload) if payload.as_bool() == Some(true) => Ok(()),
            Ok(_) => Err(format!("'{}' not focusable", descriptor.selector)),
            Err(err) => Err(err.to_string()),
        };
        report.record(&format!("focus {}", descriptor.selector), result);
    }

    report
}

/// Focus each input descriptor and insert the configured text through the
/// input pipeline, firing lookups the page may perform on keystrokes.
pub async fn simulate_typing(
    page: &Arc<dyn PageOps>,
    inputs: &[ElementDescriptor],
    config: &BehaviorConfig,
) -> BehaviorReport {
    let mut report = BehaviorReport::default();

    for descriptor in inputs.iter().take(config.max_typing_targets) {
        let focus = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el || typeof el.focus !== "function") return false;
    el.focus();
    return document.activeElement === el;
}})()"#,
            selector = js_string(&descriptor.selector),
        );
        let result = match page.evaluate(&focus).await {
            Ok(payload) if payload.as_bool() == Some(true) => page
                .insert_text(&config.typing_text)
                .await
                .map_err(|err| err.to_string()),
            Ok(_) => Err(format!("'{}' did not take focus", descriptor.selector)),
            Err(err) => Err(err.to_string()),
        };
        report.record(&format!("type into {}", descriptor.selector), result);
    }

    report
}

/// Cycle through alternate viewport sizes, triggering responsive-image
/// and media-query loads, then restore the original viewport. The restore
/// runs even when a resize failed partway.
pub async fn simulate_viewport_changes(
    page: &Arc<dyn PageOps>,
    original: &Viewport,
    config: &BehaviorConfig,
) -> BehaviorReport {
    let mut report = BehaviorReport::default();

    for size in &config.viewport_sizes {
        let label = format!("viewport {}x{}", size.width, size.height);
        let result = page.set_viewport(size.clone()).await;
        let failed = result.is_err();
        report.record(&label, result);
        if failed {
            break;
        }
        tokio::time::sleep(config.viewport_hold).await;
    }

    let result = page.set_viewport(original.clone()).await;
    report.record("viewport restore", result);

    report
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdp_session::{SessionError, SessionErrorKind};
    use parking_lot::Mutex;
    use perceiver_interactive::{DiscoverySource, ElementRect};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::broadcast;

    struct FakePage {
        /// Sequence of page heights returned by successive measurements.
        heights: Vec<u64>,
        measure_calls: AtomicU64,
        evaluated: Mutex<Vec<String>>,
        typed: Mutex<Vec<String>>,
        viewports: Mutex<Vec<Viewport>>,
        fail_viewport_width: Option<u32>,
    }

    impl FakePage {
        fn with_heights(heights: Vec<u64>) -> Arc<Self> {
            Arc::new(Self {
                heights,
                measure_calls: AtomicU64::new(0),
                evaluated: Mutex::new(Vec::new()),
                typed: Mutex::new(Vec::new()),
                viewports: Mutex::new(Vec::new()),
                fail_viewport_width: None,
            })
        }

        fn scroll_targets(&self) -> Vec<String> {
            self.evaluated
                .lock()
                .iter()
                .filter(|e| e.starts_with("window.scrollTo"))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl PageOps for FakePage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), SessionError> {
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> Result<Value, SessionError> {
            self.evaluated.lock().push(expression.to_string());
            if expression.contains("scrollHeight") && expression.contains("innerHeight") {
                let call = self.measure_calls.fetch_add(1, Ordering::SeqCst) as usize;
                let height = *self
                    .heights
                    .get(call)
                    .or_else(|| self.heights.last())
                    .unwrap_or(&0);
                return Ok(json!({ "page": height, "view": 800 }));
            }
            Ok(json!(true))
        }

        async fn dispatch_click(&self, _x: f64, _y: f64) -> Result<(), SessionError> {
            Ok(())
        }

        async fn insert_text(&self, text: &str) -> Result<(), SessionError> {
            self.typed.lock().push(text.to_string());
            Ok(())
        }

        async fn set_viewport(&self, viewport: Viewport) -> Result<(), SessionError> {
            if self.fail_viewport_width == Some(viewport.width) {
                return Err(SessionError::new(SessionErrorKind::Internal)
                    .with_hint("viewport rejected"));
            }
            self.viewports.lock().push(viewport);
            Ok(())
        }

        fn network_events(&self) -> broadcast::Receiver<network_tap::NetworkEvent> {
            broadcast::channel(1).1
        }

        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn fast_config() -> BehaviorConfig {
        BehaviorConfig {
            scroll_pause: (Duration::from_millis(1), Duration::from_millis(2)),
            hover_pause: Duration::from_millis(1),
            viewport_hold: Duration::from_millis(1),
            ..BehaviorConfig::default()
        }
    }

    fn descriptor(selector: &str) -> ElementDescriptor {
        ElementDescriptor {
            selector: selector.to_string(),
            tag: "button".to_string(),
            role: None,
            text: "Go".to_string(),
            rect: ElementRect {
                x: 5.0,
                y: 5.0,
                width: 40.0,
                height: 20.0,
            },
            visible: true,
            disabled: false,
            has_click_handler: false,
            confidence: 0.8,
            source: DiscoverySource::Semantic,
        }
    }

    #[tokio::test]
    async fn scroll_steps_follow_page_height() {
        // 2400 / 800 viewport means two steps past the initial screen.
        let page = FakePage::with_heights(vec![2400]);
        let report = simulate_scrolling(&(page.clone() as Arc<dyn PageOps>), &fast_config()).await;

        assert_eq!(
            page.scroll_targets(),
            vec![
                "window.scrollTo(0, 800)",
                "window.scrollTo(0, 1600)",
                "window.scrollTo(0, 0)",
            ]
        );
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn lazy_load_growth_extends_walk_within_cap() {
        // Page grows from 1600 to 4000 after the first step.
        let page = FakePage::with_heights(vec![1600, 4000]);
        let config = BehaviorConfig {
            max_scroll_steps: 3,
            ..fast_config()
        };
        let report = simulate_scrolling(&(page.clone() as Arc<dyn PageOps>), &config).await;

        // 4000 / 800 would want four steps; the cap holds it at three.
        let targets = page.scroll_targets();
        assert_eq!(targets.len(), 4); // three steps plus return to top
        assert_eq!(targets.last().unwrap(), "window.scrollTo(0, 0)");
        assert_eq!(report.succeeded, report.attempted);
    }

    #[tokio::test]
    async fn short_page_scrolls_nothing() {
        let page = FakePage::with_heights(vec![600]);
        let report = simulate_scrolling(&(page.clone() as Arc<dyn PageOps>), &fast_config()).await;

        assert!(page.scroll_targets().is_empty());
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn hover_is_bounded_and_best_effort() {
        let page = FakePage::with_heights(vec![600]);
        let elements: Vec<_> = (0..10).map(|i| descriptor(&format!("#el-{i}"))).collect();
        let config = BehaviorConfig {
            max_hover_targets: 4,
            ..fast_config()
        };

        let report =
            simulate_hover(&(page.clone() as Arc<dyn PageOps>), &elements, &config).await;
        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 4);
    }

    #[tokio::test]
    async fn typing_inserts_configured_text() {
        let page = FakePage::with_heights(vec![600]);
        let inputs = vec![descriptor("#search")];
        let config = BehaviorConfig {
            typing_text: "hello".to_string(),
            ..fast_config()
        };

        let report =
            simulate_typing(&(page.clone() as Arc<dyn PageOps>), &inputs, &config).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(*page.typed.lock(), vec!["hello"]);
    }

    #[tokio::test]
    async fn viewport_cycle_always_restores_original() {
        let page = Arc::new(FakePage {
            heights: vec![600],
            measure_calls: AtomicU64::new(0),
            evaluated: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            viewports: Mutex::new(Vec::new()),
            fail_viewport_width: Some(1920),
        });
        let original = Viewport {
            width: 1366,
            height: 768,
            device_scale_factor: 1.0,
            mobile: false,
        };

        let report = simulate_viewport_changes(
            &(page.clone() as Arc<dyn PageOps>),
            &original,
            &fast_config(),
        )
        .await;

        // 768 applied, 1920 rejected, original restored regardless.
        let applied = page.viewports.lock();
        assert_eq!(applied.first().map(|v| v.width), Some(768));
        assert_eq!(applied.last().map(|v| v.width), Some(1366));
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("1920"));
    }
}
