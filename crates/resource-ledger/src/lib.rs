//! Resource classification and byte accounting.
//!
//! Maps each captured transfer to a coarse kind and sums billable bytes per
//! kind. Classification is a pure function of `(content_type, url)`;
//! observability and billing stay separate — error responses remain in the
//! raw record list but never contribute to a tally.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use network_tap::ResourceRecord;

/// Coarse transfer categories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Style,
    Script,
    Media,
    Font,
    Other,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Document,
        ResourceKind::Style,
        ResourceKind::Script,
        ResourceKind::Media,
        ResourceKind::Font,
        ResourceKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Style => "style",
            ResourceKind::Script => "script",
            ResourceKind::Media => "media",
            ResourceKind::Font => "font",
            ResourceKind::Other => "other",
        }
    }
}

const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "less"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "wasm"];
const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp", "mp4", "webm", "ogg", "mp3",
    "wav", "flac", "glb", "gltf",
];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];
const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

/// Classify one transfer. Declared content type wins; the URL extension is
/// only consulted when the type is absent or matches nothing. Favicons are
/// forced to media whatever their extension claims.
pub fn classify_kind(content_type: Option<&str>, url: &str) -> ResourceKind {
    if is_favicon(url) {
        return ResourceKind::Media;
    }

    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("text/html") {
            return ResourceKind::Document;
        }
        if ct.contains("text/css") {
            return ResourceKind::Style;
        }
        if ct.contains("javascript") {
            return ResourceKind::Script;
        }
        if ct.contains("font") {
            return ResourceKind::Font;
        }
        if ["image", "video", "audio", "model"]
            .iter()
            .any(|prefix| ct.contains(prefix))
        {
            return ResourceKind::Media;
        }
    }

    match url_extension(url) {
        Some(ext) if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) => ResourceKind::Document,
        Some(ext) if STYLE_EXTENSIONS.contains(&ext.as_str()) => ResourceKind::Style,
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext.as_str()) => ResourceKind::Script,
        Some(ext) if MEDIA_EXTENSIONS.contains(&ext.as_str()) => ResourceKind::Media,
        Some(ext) if FONT_EXTENSIONS.contains(&ext.as_str()) => ResourceKind::Font,
        _ => ResourceKind::Other,
    }
}

fn is_favicon(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .map(|name| name.eq_ignore_ascii_case("favicon.ico") || name.starts_with("favicon"))
        .unwrap_or(false)
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Byte sum and transfer count for one kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KindTally {
    pub bytes: u64,
    pub count: u64,
}

/// Per-kind byte sums plus the grand total, built once per completed
/// session from the final record set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceTally {
    pub kinds: BTreeMap<ResourceKind, KindTally>,
    pub total_bytes: u64,
    pub total_count: u64,
}

impl ResourceTally {
    pub fn kind(&self, kind: ResourceKind) -> KindTally {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }
}

/// Build a tally from the monitor's final record list.
///
/// A URL reported more than once by the instrumentation channel counts
/// once (first occurrence wins); error responses count toward nothing.
pub fn classify(records: &[ResourceRecord]) -> ResourceTally {
    let mut tally = ResourceTally::default();
    let mut seen_urls: HashSet<&str> = HashSet::new();

    for record in records {
        if !seen_urls.insert(record.url.as_str()) {
            debug!(target: "resource-ledger", url = %record.url, "duplicate url skipped");
            continue;
        }
        if !record.billable() {
            continue;
        }

        let kind = classify_kind(record.mime_type.as_deref(), &record.url);
        let entry = tally.kinds.entry(kind).or_default();
        entry.bytes += record.transferred_bytes;
        entry.count += 1;
        tally.total_bytes += record.transferred_bytes;
        tally.total_count += 1;
    }

    tally
}
