//! Core data model shared across the crawl engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Distinguishes long-form prose documentation from a generated symbol
/// index. Drives extractor selection and `route_key` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Reference,
    Api,
}

impl DocKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DocKind::Reference => "reference",
            DocKind::Api => "api",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering priority for queue items. Lower variant wins; derived `Ord`
/// compares discriminants in declaration order, giving CRITICAL < HIGH <
/// NORMAL < LOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

/// A static resource referenced by a page: stylesheet, script, image, font.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub url: String,
    pub kind: ResourceKind,
    pub local_path: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Css,
    Js,
    Img,
    Font,
    Other,
}

impl ResourceKind {
    /// Classify a resource by its URL's file extension.
    #[must_use]
    pub fn from_extension(path: &str) -> Self {
        let ext = path
            .rsplit('.')
            .next()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "css" => ResourceKind::Css,
            "js" | "mjs" => ResourceKind::Js,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "bmp" => ResourceKind::Img,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => ResourceKind::Font,
            _ => ResourceKind::Other,
        }
    }

    #[must_use]
    pub const fn subtree(self) -> &'static str {
        match self {
            ResourceKind::Css => "static/css",
            ResourceKind::Js => "static/js",
            ResourceKind::Img => "static/img",
            ResourceKind::Font => "static/fonts",
            ResourceKind::Other => "static",
        }
    }
}

/// One node in a page's navigation tree. Recursive; hrefs are left raw
/// (relative to the source page) and resolved only at render time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigationItem {
    pub text: String,
    pub href: String,
    #[serde(default)]
    pub children: Vec<NavigationItem>,
}

/// One retained page's extracted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedContent {
    pub title: String,
    pub body_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_tree: Option<NavigationItem>,
    pub kind: DocKind,
    pub project: String,
    pub scraped_at: DateTime<Utc>,
}

/// A routing table entry; `route_key` is globally unique within a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteModel {
    pub route_key: String,
    pub content_file: String,
    pub title: String,
    pub project: String,
    pub kind: DocKind,
}

/// The per-`DocKind` page skin: a page with its main content container
/// emptied and replaced by a placeholder marker. Write-once, read-many.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub kind: DocKind,
    pub skin_html: String,
    pub path: PathBuf,
}

/// Metadata carried alongside a queued URL, set at seed/discovery time and
/// threaded unchanged through retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocKind>,
    #[serde(default)]
    pub is_index: bool,
}

/// Compute the canonical route key for a page: `/{project}/{kind}/{tail}`
/// where `tail` is the last two non-empty path segments of the source URL,
/// or empty for the index page.
#[must_use]
pub fn route_key(project: &str, kind: DocKind, path: &str, is_index: bool) -> String {
    if is_index {
        return format!("/{project}/{kind}");
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let tail: Vec<&str> = segments.iter().rev().take(2).rev().copied().collect();
    if tail.is_empty() {
        format!("/{project}/{kind}")
    } else {
        format!("/{project}/{kind}/{}", tail.join("/"))
    }
}

/// `hash8(s) = hex(md5(s))[..8]`. See DESIGN.md Open Questions for why MD5
/// over a non-cryptographic hash.
#[must_use]
pub fn hash8(s: &str) -> String {
    use md5::{Digest, Md5};
    let digest = Md5::digest(s.as_bytes());
    hex::encode(digest)[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_critical_high_normal_low() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn hash8_is_stable_and_eight_chars() {
        let a = hash8("https://example.com/docs/");
        let b = hash8("https://example.com/docs/");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn route_key_uses_last_two_segments() {
        let key = route_key("spring-boot", DocKind::Reference, "/docs/guide/intro", false);
        assert_eq!(key, "/spring-boot/reference/guide/intro");
    }

    #[test]
    fn route_key_index_has_no_tail() {
        let key = route_key("spring-boot", DocKind::Reference, "/docs/", true);
        assert_eq!(key, "/spring-boot/reference");
    }

    #[test]
    fn resource_kind_from_extension() {
        assert_eq!(ResourceKind::from_extension("style.css"), ResourceKind::Css);
        assert_eq!(ResourceKind::from_extension("app.min.js"), ResourceKind::Js);
        assert_eq!(ResourceKind::from_extension("logo.SVG"), ResourceKind::Img);
        assert_eq!(ResourceKind::from_extension("font.woff2"), ResourceKind::Font);
        assert_eq!(ResourceKind::from_extension("data"), ResourceKind::Other);
    }
}
