//! Scoring, navigation filtering and deduplication applied to raw probe
//! candidates. Pure functions, independent of the browser.

use std::collections::HashSet;

use crate::model::{DiscoveryConfig, DiscoverySource, ElementDescriptor, RawCandidate};

/// Class-name fragments and the confidence they contribute. Fixed table;
/// the highest matching weight wins.
const CLASS_WEIGHTS: &[(&str, f64)] = &[
    ("btn", 0.9),
    ("button", 0.9),
    ("submit", 0.85),
    ("cta", 0.8),
    ("toggle", 0.75),
    ("switch", 0.75),
    ("action", 0.7),
    ("clickable", 0.7),
    ("interactive", 0.65),
    ("card", 0.5),
    ("tile", 0.5),
    ("link", 0.35),
];

/// Text labels that mark an element as navigation; interacting with these
/// would leave the page mid-analysis.
const NAV_KEYWORDS: &[&str] = &[
    "home", "about", "contact", "blog", "login", "log in", "sign in", "sign up", "register",
    "next", "previous", "back", "menu", "privacy", "terms", "careers",
];

fn base_confidence(candidate: &RawCandidate) -> f64 {
    match candidate.source {
        DiscoverySource::Semantic => 0.9,
        DiscoverySource::Attribute => 0.8,
        DiscoverySource::ClassPattern => candidate
            .classes
            .iter()
            .flat_map(|class| {
                let class = class.to_ascii_lowercase();
                CLASS_WEIGHTS
                    .iter()
                    .filter(move |(fragment, _)| class.contains(fragment))
                    .map(|(_, weight)| *weight)
                    .collect::<Vec<_>>()
            })
            .fold(0.0, f64::max),
    }
}

/// Score one candidate into a final confidence in `[0, 1]`.
pub fn score(candidate: &RawCandidate) -> f64 {
    let mut confidence = base_confidence(candidate);
    if candidate.has_click_handler {
        confidence += 0.05;
    }
    if !candidate.visible || candidate.rect.is_empty() {
        confidence -= 0.3;
    }
    if candidate.disabled {
        confidence -= 0.2;
    }
    confidence.clamp(0.0, 1.0)
}

/// Whether a candidate looks like site navigation.
pub fn is_navigation(candidate: &RawCandidate) -> bool {
    if candidate.has_href {
        return true;
    }
    if candidate.tag.eq_ignore_ascii_case("a") || candidate.tag.eq_ignore_ascii_case("nav") {
        return true;
    }
    let text = candidate.text.trim().to_ascii_lowercase();
    !text.is_empty() && NAV_KEYWORDS.iter().any(|kw| text == *kw)
}

/// Apply config filters, score, and deduplicate by `(selector, text)`.
/// Candidate order is preserved; the first occurrence of a pair wins.
pub fn refine(candidates: Vec<RawCandidate>, config: &DiscoveryConfig) -> Vec<ElementDescriptor> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();

    for candidate in candidates {
        if !config.include_navigation && is_navigation(&candidate) {
            continue;
        }
        if config.visible_only && !(candidate.visible && candidate.in_viewport) {
            continue;
        }
        if candidate.rect.is_empty() && config.visible_only {
            continue;
        }
        if !seen.insert((candidate.selector.clone(), candidate.text.clone())) {
            continue;
        }

        let confidence = score(&candidate);
        out.push(ElementDescriptor {
            selector: candidate.selector,
            tag: candidate.tag,
            role: candidate.role,
            text: candidate.text,
            rect: candidate.rect,
            visible: candidate.visible,
            disabled: candidate.disabled,
            has_click_handler: candidate.has_click_handler,
            confidence,
            source: candidate.source,
        });

        if out.len() >= config.max_elements {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementRect;

    fn candidate(selector: &str, text: &str) -> RawCandidate {
        RawCandidate {
            selector: selector.to_string(),
            tag: "button".to_string(),
            role: None,
            text: text.to_string(),
            rect: ElementRect {
                x: 10.0,
                y: 10.0,
                width: 80.0,
                height: 24.0,
            },
            visible: true,
            in_viewport: true,
            disabled: false,
            has_click_handler: false,
            has_href: false,
            classes: Vec::new(),
            source: DiscoverySource::Semantic,
        }
    }

    #[test]
    fn dedup_is_by_selector_and_text_pair() {
        let candidates = vec![
            candidate("#buy", "Buy"),
            candidate("#buy", "Buy"),
            candidate("#buy", "Buy now"),
        ];
        let refined = refine(candidates, &DiscoveryConfig::default());
        assert_eq!(refined.len(), 2);
    }

    #[test]
    fn navigation_candidates_are_excluded_by_default() {
        let mut anchor = candidate("a.more", "Read more");
        anchor.tag = "a".to_string();
        anchor.has_href = true;
        let mut nav_text = candidate("#nav-about", "About");

        let refined = refine(
            vec![anchor.clone(), nav_text.clone(), candidate("#buy", "Buy")],
            &DiscoveryConfig::default(),
        );
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].selector, "#buy");

        nav_text.text = "About our coffee".to_string();
        assert!(!is_navigation(&nav_text), "substring is not a nav label");
        assert!(is_navigation(&anchor));
    }

    #[test]
    fn class_pattern_uses_highest_matching_weight() {
        let mut c = candidate("div.cta-btn", "Go");
        c.source = DiscoverySource::ClassPattern;
        c.classes = vec!["cta-btn".to_string()];
        // Matches both "cta" (0.8) and "btn" (0.9); the max wins.
        assert!((score(&c) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn invisible_and_disabled_candidates_score_lower() {
        let fully_usable = score(&candidate("#a", "Go"));

        let mut hidden = candidate("#a", "Go");
        hidden.visible = false;
        let mut disabled = candidate("#a", "Go");
        disabled.disabled = true;

        assert!(score(&hidden) < fully_usable);
        assert!(score(&disabled) < fully_usable);
    }

    #[test]
    fn max_elements_bounds_the_result() {
        let candidates = (0..100)
            .map(|i| candidate(&format!("#b{i}"), "Go"))
            .collect();
        let config = DiscoveryConfig {
            max_elements: 7,
            ..DiscoveryConfig::default()
        };
        assert_eq!(refine(candidates, &config).len(), 7);
    }
}
