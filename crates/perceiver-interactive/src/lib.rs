//! Interactive-element discovery for pagecarbon.
//!
//! Probes the rendered document for candidate interactive elements with
//! layered heuristics: semantic/role selectors, attribute patterns and a
//! class-name confidence table, filtered by visibility and geometry. The
//! probing runs inside the page; the orchestrator only ever receives
//! [`ElementDescriptor`] snapshots, never live handles.

pub mod heuristics;
pub mod model;
pub mod probe;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use cdp_session::{PageOps, SessionError};

pub use crate::model::{
    DiscoveryConfig, DiscoverySource, ElementDescriptor, ElementKind, ElementRect,
    InteractiveElements, RawCandidate,
};

#[derive(Debug, Error)]
pub enum PerceiveError {
    #[error("probe evaluation failed: {0}")]
    Evaluate(#[from] SessionError),
    #[error("probe payload could not be decoded: {0}")]
    Decode(String),
}

/// Discovery facade bound to one page.
pub struct Perceiver {
    page: Arc<dyn PageOps>,
}

impl Perceiver {
    pub fn new(page: Arc<dyn PageOps>) -> Self {
        Self { page }
    }

    /// One full pass over the common interactive categories.
    pub async fn find_interactive(
        &self,
        config: &DiscoveryConfig,
    ) -> Result<InteractiveElements, PerceiveError> {
        Ok(InteractiveElements {
            buttons: self.find_by_type(ElementKind::Button, config).await?,
            hoverables: self.find_by_type(ElementKind::Hoverable, config).await?,
            triggers: self.find_by_type(ElementKind::Trigger, config).await?,
        })
    }

    /// Probe for a single element category.
    pub async fn find_by_type(
        &self,
        kind: ElementKind,
        config: &DiscoveryConfig,
    ) -> Result<Vec<ElementDescriptor>, PerceiveError> {
        let raw = self.run_probe(Some(kind)).await?;
        let refined = heuristics::refine(raw, config);
        debug!(
            target: "perceiver",
            kind = kind.as_str(),
            found = refined.len(),
            "discovery pass complete"
        );
        Ok(refined)
    }

    /// Probe every layer at once and rank the union by confidence.
    pub async fn find_smart(
        &self,
        config: &DiscoveryConfig,
    ) -> Result<Vec<ElementDescriptor>, PerceiveError> {
        let raw = self.run_probe(None).await?;
        let mut refined = heuristics::refine(raw, config);
        refined.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(refined)
    }

    async fn run_probe(&self, kind: Option<ElementKind>) -> Result<Vec<RawCandidate>, PerceiveError> {
        let script = probe::probe_script(kind);
        let payload = self.page.evaluate(&script).await?;
        probe::parse_candidates(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct FakePage {
        payload: Value,
    }

    #[async_trait]
    impl PageOps for FakePage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), SessionError> {
            Ok(())
        }

        async fn evaluate(&self, _expression: &str) -> Result<Value, SessionError> {
            Ok(self.payload.clone())
        }

        async fn dispatch_click(&self, _x: f64, _y: f64) -> Result<(), SessionError> {
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

    fn candidate_json(selector: &str, source: &str, classes: Vec<&str>) -> Value {
        json!({
            "selector": selector,
            "tag": "button",
            "text": "Go",
            "rect": { "x": 5.0, "y": 5.0, "width": 60.0, "height": 20.0 },
            "visible": true,
            "in_viewport": true,
            "disabled": false,
            "has_click_handler": false,
            "has_href": false,
            "classes": classes,
            "source": source,
        })
    }

    #[tokio::test]
    async fn find_smart_ranks_by_confidence() {
        let page = Arc::new(FakePage {
            payload: json!([
                candidate_json("div.card", "classpattern", vec!["card"]),
                candidate_json("#submit", "semantic", vec![]),
                candidate_json("div.cta", "classpattern", vec!["cta"]),
            ]),
        });
        let perceiver = Perceiver::new(page);
        let found = perceiver
            .find_smart(&DiscoveryConfig::default())
            .await
            .expect("probe");

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].selector, "#submit");
        assert!(found[0].confidence >= found[1].confidence);
        assert!(found[1].confidence >= found[2].confidence);
    }

    #[tokio::test]
    async fn find_interactive_groups_by_kind() {
        let page = Arc::new(FakePage {
            payload: json!([candidate_json("#go", "semantic", vec![])]),
        });
        let perceiver = Perceiver::new(page);
        let found = perceiver
            .find_interactive(&DiscoveryConfig::default())
            .await
            .expect("probe");

        // The fake returns the same payload for every layer; each group
        // sees one candidate.
        assert_eq!(found.buttons.len(), 1);
        assert_eq!(found.hoverables.len(), 1);
        assert_eq!(found.triggers.len(), 1);
    }
}
