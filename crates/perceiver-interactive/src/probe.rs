//! The in-page probing script.
//!
//! Discovery heuristics that need DOM geometry and computed style run
//! inside the page's own execution context; only plain JSON snapshots come
//! back across the evaluate boundary.

use serde_json::Value;

use crate::model::{ElementKind, RawCandidate};
use crate::PerceiveError;

/// Selector layer applied for each element kind.
fn semantic_selectors(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Button => {
            "button, [role=button], input[type=submit], input[type=button], summary"
        }
        ElementKind::Hoverable => "[aria-haspopup], [data-tooltip], .dropdown, .menu, [title]",
        ElementKind::Trigger => "[data-toggle], [data-action], [aria-expanded], [aria-controls]",
        ElementKind::Input => "input:not([type=hidden]), textarea, select, [contenteditable=true]",
    }
}

const ATTRIBUTE_SELECTORS: &str = "[onclick], [data-action], [data-click], [data-testid]";
const CLASS_PATTERN: &str = "btn|button|cta|toggle|switch|clickable|interactive|card|tile|action";

/// Build the self-contained IIFE for one probe pass. `kind = None` scans
/// every semantic layer at once.
pub fn probe_script(kind: Option<ElementKind>) -> String {
    let semantic = match kind {
        Some(kind) => semantic_selectors(kind).to_string(),
        None => ElementKind::ALL_SCANNED
            .iter()
            .map(|k| semantic_selectors(*k))
            .collect::<Vec<_>>()
            .join(", "),
    };

    format!(
        r##"(() => {{
    const SEMANTIC = {semantic:?};
    const ATTRIBUTE = {attribute:?};
    const CLASS_RE = new RegExp({class_pattern:?}, "i");
    const MAX_PER_LAYER = 120;

    const seen = new Set();
    const out = [];

    const cssEscape = (value) => (window.CSS && CSS.escape) ? CSS.escape(value) : value;

    const buildSelector = (el) => {{
        if (el.id) return "#" + cssEscape(el.id);
        const testid = el.getAttribute("data-testid");
        if (testid) return el.tagName.toLowerCase() + '[data-testid="' + testid + '"]';
        const parts = [];
        let node = el;
        while (node && node.nodeType === 1 && parts.length < 4) {{
            let part = node.tagName.toLowerCase();
            if (node.id) {{ parts.unshift("#" + cssEscape(node.id)); break; }}
            const siblings = node.parentElement
                ? Array.from(node.parentElement.children).filter(c => c.tagName === node.tagName)
                : [];
            if (siblings.length > 1) {{
                part += ":nth-of-type(" + (siblings.indexOf(node) + 1) + ")";
            }}
            parts.unshift(part);
            node = node.parentElement;
        }}
        return parts.join(" > ");
    }};

    const isVisible = (el, rect) => {{
        const style = window.getComputedStyle(el);
        return style.display !== "none"
            && style.visibility !== "hidden"
            && parseFloat(style.opacity || "1") > 0
            && rect.width > 0 && rect.height > 0;
    }};

    const snapshot = (el, source) => {{
        if (seen.has(el)) return;
        seen.add(el);
        const rect = el.getBoundingClientRect();
        out.push({{
            selector: buildSelector(el),
            tag: el.tagName.toLowerCase(),
            role: el.getAttribute("role"),
            text: (el.innerText || el.value || "").trim().slice(0, 120),
            rect: {{ x: rect.left, y: rect.top, width: rect.width, height: rect.height }},
            visible: isVisible(el, rect),
            in_viewport: rect.bottom > 0 && rect.right > 0
                && rect.top < window.innerHeight && rect.left < window.innerWidth,
            disabled: el.disabled === true || el.getAttribute("aria-disabled") === "true",
            has_click_handler: typeof el.onclick === "function"
                || el.hasAttribute("onclick")
                || el.hasAttribute("data-action"),
            has_href: el.tagName === "A" && el.hasAttribute("href"),
            classes: Array.from(el.classList),
            source: source,
        }});
    }};

    const collect = (selector, source) => {{
        let elements;
        try {{ elements = document.querySelectorAll(selector); }} catch (err) {{ return; }}
        let n = 0;
        for (const el of elements) {{
            if (n++ >= MAX_PER_LAYER) break;
            snapshot(el, source);
        }}
    }};

    collect(SEMANTIC, "semantic");
    collect(ATTRIBUTE, "attribute");

    let scanned = 0;
    for (const el of document.querySelectorAll("*")) {{
        if (scanned++ >= 4000) break;
        if (el.classList.length && CLASS_RE.test(el.className)) {{
            snapshot(el, "classpattern");
        }}
    }}

    return out;
}})()"##,
        semantic = semantic,
        attribute = ATTRIBUTE_SELECTORS,
        class_pattern = CLASS_PATTERN,
    )
}

impl ElementKind {
    /// Kinds covered by the unscoped smart scan.
    pub const ALL_SCANNED: [ElementKind; 3] = [
        ElementKind::Button,
        ElementKind::Hoverable,
        ElementKind::Trigger,
    ];
}

/// Decode the probe's JSON payload. A malformed payload is an error; an
/// empty array is a legitimate "nothing found".
pub fn parse_candidates(value: &Value) -> Result<Vec<RawCandidate>, PerceiveError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value.clone())
        .map_err(|err| PerceiveError::Decode(format!("probe payload: {err}")))
}
