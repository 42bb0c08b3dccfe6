//! The fixed strategy set and its adaptive ordering.

use perceiver_interactive::ElementDescriptor;
use serde::{Deserialize, Serialize};

/// One concrete technique for attempting a UI interaction. A closed set;
/// ordering between members is decided per element, never the set itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Resolve the selector in-page and click its center through the
    /// input pipeline.
    Native,
    /// Dispatch a synthetic event sequence (focus, mouse*, click) plus a
    /// direct `.click()` from inside the page.
    ScriptDispatch,
    /// Re-resolve the element by visible text across common interactive
    /// selectors, then dispatch.
    TextSearch,
    /// Pointer click at the descriptor's recorded center point.
    Coordinate,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Native => "native",
            Strategy::ScriptDispatch => "script",
            Strategy::TextSearch => "text",
            Strategy::Coordinate => "coordinate",
        }
    }

    fn default_priority(&self) -> i32 {
        match self {
            Strategy::Native => 10,
            Strategy::ScriptDispatch => 20,
            Strategy::TextSearch => 30,
            Strategy::Coordinate => 40,
        }
    }
}

/// Compute the attempt order for one element.
///
/// Pure function: the default priorities are shifted by what the
/// descriptor already tells us, then sorted ascending. Coordinate clicking
/// is only eligible when the recorded geometry is actually usable.
pub fn strategy_order(descriptor: &ElementDescriptor) -> Vec<Strategy> {
    let mut weighted: Vec<(i32, Strategy)> = [
        Strategy::Native,
        Strategy::ScriptDispatch,
        Strategy::TextSearch,
        Strategy::Coordinate,
    ]
    .into_iter()
    .filter(|s| *s != Strategy::Coordinate || descriptor.has_valid_point())
    .map(|s| {
        let mut priority = s.default_priority();
        match s {
            Strategy::Native => {
                if descriptor.has_stable_selector() {
                    priority -= 5;
                }
                // A disabled or invisible element rarely responds to the
                // input pipeline; push native behind script and coordinate.
                if descriptor.disabled || !descriptor.visible {
                    priority += 35;
                }
            }
            Strategy::ScriptDispatch => {
                if descriptor.has_click_handler {
                    priority -= 15;
                }
            }
            Strategy::TextSearch => {
                if descriptor.text.trim().is_empty() {
                    priority += 20;
                }
            }
            Strategy::Coordinate => {}
        }
        (priority, s)
    })
    .collect();

    weighted.sort_by_key(|(priority, _)| *priority);
    weighted.into_iter().map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceiver_interactive::{DiscoverySource, ElementRect};

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

    #[test]
    fn default_order_starts_native() {
        let order = strategy_order(&descriptor());
        assert_eq!(
            order,
            vec![
                Strategy::Native,
                Strategy::ScriptDispatch,
                Strategy::TextSearch,
                Strategy::Coordinate,
            ]
        );
    }

    #[test]
    fn click_handler_favors_script_dispatch() {
        let mut d = descriptor();
        d.has_click_handler = true;
        let order = strategy_order(&d);
        assert_eq!(order[0], Strategy::ScriptDispatch);
        assert_eq!(order[1], Strategy::Native);
    }

    #[test]
    fn disabled_element_pushes_native_behind_script_and_coordinate() {
        let mut d = descriptor();
        d.disabled = true;
        let order = strategy_order(&d);
        let native_pos = order.iter().position(|s| *s == Strategy::Native).unwrap();
        let script_pos = order
            .iter()
            .position(|s| *s == Strategy::ScriptDispatch)
            .unwrap();
        let coord_pos = order
            .iter()
            .position(|s| *s == Strategy::Coordinate)
            .unwrap();
        assert!(script_pos < native_pos);
        assert!(coord_pos < native_pos);
    }

    #[test]
    fn coordinate_requires_valid_geometry() {
        let mut d = descriptor();
        d.rect = ElementRect::default();
        let order = strategy_order(&d);
        assert!(!order.contains(&Strategy::Coordinate));

        let mut invisible = descriptor();
        invisible.visible = false;
        let order = strategy_order(&invisible);
        assert!(!order.contains(&Strategy::Coordinate));
    }

    #[test]
    fn stable_selector_keeps_native_ahead_of_favored_script() {
        let mut d = descriptor();
        d.selector = "#buy".to_string();
        d.has_click_handler = true;
        let order = strategy_order(&d);
        // native 10-5=5, script 20-15=5; stable sort keeps native first.
        assert_eq!(order[0], Strategy::Native);
    }
}
