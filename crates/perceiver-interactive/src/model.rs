//! Descriptor snapshots crossing the in-page boundary.

use serde::{Deserialize, Serialize};

/// Bounding geometry of a discovered element, viewport-relative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Which heuristic layer produced a candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Semantic,
    Attribute,
    ClassPattern,
}

/// Immutable snapshot of one discovered element, detached from the live
/// DOM. Recomputed on every discovery pass; never a handle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub selector: String,
    pub tag: String,
    pub role: Option<String>,
    pub text: String,
    pub rect: ElementRect,
    pub visible: bool,
    pub disabled: bool,
    pub has_click_handler: bool,
    pub confidence: f64,
    pub source: DiscoverySource,
}

impl ElementDescriptor {
    /// Whether the recorded geometry is usable for a coordinate click.
    pub fn has_valid_point(&self) -> bool {
        let (x, y) = self.rect.center();
        self.visible && !self.rect.is_empty() && x > 0.0 && y > 0.0
    }

    /// Whether the selector pins a single element across re-renders.
    pub fn has_stable_selector(&self) -> bool {
        self.selector.starts_with('#')
            || self.selector.contains("[data-testid=")
            || self.selector.contains("[id=")
    }
}

/// Raw candidate as emitted by the in-page probe, before scoring and
/// filtering on the orchestrator side.
#[derive(Clone, Debug, Deserialize)]
pub struct RawCandidate {
    pub selector: String,
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: ElementRect,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub in_viewport: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub has_click_handler: bool,
    #[serde(default)]
    pub has_href: bool,
    #[serde(default)]
    pub classes: Vec<String>,
    pub source: DiscoverySource,
}

/// Element categories the simulator asks for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Hoverable,
    Trigger,
    Input,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Button => "button",
            ElementKind::Hoverable => "hoverable",
            ElementKind::Trigger => "trigger",
            ElementKind::Input => "input",
        }
    }
}

/// The grouped result of a full interactive-discovery pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct InteractiveElements {
    pub buttons: Vec<ElementDescriptor>,
    pub hoverables: Vec<ElementDescriptor>,
    pub triggers: Vec<ElementDescriptor>,
}

/// Tuning for one discovery pass.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Keep anchors and navigation-labelled elements. Off by default so an
    /// interaction round cannot navigate away mid-analysis.
    pub include_navigation: bool,
    /// Drop candidates that are invisible or outside the viewport.
    pub visible_only: bool,
    /// Upper bound on candidates returned per pass.
    pub max_elements: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_navigation: false,
            visible_only: true,
            max_elements: 50,
        }
    }
}
