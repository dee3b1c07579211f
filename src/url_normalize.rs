//! URL normalization, pattern collapsing and scope rules.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// The canonical string form used for dedup. Two URLs that dereference the
/// same resource must have equal normalized forms under this scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedURL(String);

impl NormalizedURL {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedURL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop fragment, preserve query verbatim, trim trailing slash except for
/// the bare root path.
///
/// Grounded on `async_queue.py::_normalize_url` and `link_index::normalize_url`.
pub fn normalize(url: &str) -> anyhow::Result<NormalizedURL> {
    let mut parsed = Url::parse(url)?;
    parsed.set_fragment(None);

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    Ok(NormalizedURL(parsed.as_str().to_string()))
}

/// An equivalence class over URLs that share structure modulo dynamic
/// segments. Used only as a similarity key, never dereferenced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct URLPattern(String);

impl URLPattern {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());
static HEX_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[0-9a-fA-F]{8,}(/|$)").unwrap());
static SEMVER_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+\.\d+(\.\d+)?(-[0-9A-Za-z.]+)?(/|$)").unwrap());
static DATE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d{4}/\d{2}/\d{2}(/|$)").unwrap());
static LOCALE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[a-z]{2}-[A-Z]{2}(/|$)").unwrap());
static PAGE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/page/\d+(/|$)").unwrap());

static HEX24_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[0-9a-fA-F]{24}(/|$)").unwrap());
static TRAILING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+$").unwrap());
static PAGE_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"/page/\d+$").unwrap());
static DATE_TUPLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}/\d{2}/\d{2}").unwrap());

/// Apply the ordered substitutions below. Order matters: `page/N`
/// must be matched before the generic numeric-segment rule would otherwise
/// swallow the trailing digits.
#[must_use]
pub fn pattern(normalized: &NormalizedURL) -> URLPattern {
    let mut path_and_query = {
        let url = Url::parse(normalized.as_str());
        match url {
            Ok(u) => {
                let mut s = u.path().to_string();
                if let Some(q) = u.query() {
                    s.push('?');
                    s.push_str(q);
                }
                s
            }
            Err(_) => normalized.as_str().to_string(),
        }
    };

    path_and_query = replace_with_terminator(&PAGE_SEGMENT, &path_and_query, "/page/{n}");
    path_and_query = replace_with_terminator(&DATE_SEGMENT, &path_and_query, "/{date}");
    path_and_query = replace_with_terminator(&SEMVER_SEGMENT, &path_and_query, "/v{version}");
    path_and_query = replace_with_terminator(&LOCALE_SEGMENT, &path_and_query, "/{locale}");
    // Numeric first: a pure-decimal segment of 8+ digits also matches
    // HEX_SEGMENT (hex digits include 0-9), so it must collapse to {id}
    // before the hex pass ever sees it.
    path_and_query = replace_with_terminator(&NUMERIC_SEGMENT, &path_and_query, "/{id}");
    path_and_query = replace_with_terminator(&HEX_SEGMENT, &path_and_query, "/{hash}");

    let scheme_host = {
        let url = Url::parse(normalized.as_str());
        match url {
            Ok(u) => format!(
                "{}://{}",
                u.scheme(),
                u.host_str().unwrap_or_default()
            ),
            Err(_) => String::new(),
        }
    };

    URLPattern(format!("{scheme_host}{path_and_query}"))
}

/// Regex substitution that preserves whichever terminator (`/` or end of
/// string) followed the matched segment, since the replacement template
/// doesn't itself end in a slash.
fn replace_with_terminator(re: &Regex, input: &str, replacement: &str) -> String {
    re.replace_all(input, |caps: &regex::Captures| {
        let terminator = caps.get(1).map_or("", |m| m.as_str());
        format!("{replacement}{terminator}")
    })
    .into_owned()
}

/// The path ends with a number, is a page-N tail, contains a 24-hex
/// segment, or contains a date tuple.
#[must_use]
pub fn is_likely_dynamic(url: &str) -> bool {
    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string());
    PAGE_TAIL.is_match(&path)
        || TRAILING_NUMBER.is_match(&path)
        || HEX24_SEGMENT.is_match(&path)
        || DATE_TUPLE.is_match(&path)
}

/// Same host and path-prefix of the seed (after trimming the seed's
/// trailing slash). Fragment-only links are out of scope.
#[must_use]
pub fn in_scope(url: &str, seed: &str) -> bool {
    let (Ok(url), Ok(seed)) = (Url::parse(url), Url::parse(seed)) else {
        return false;
    };
    if url.host_str() != seed.host_str() {
        return false;
    }
    let seed_path = seed.path().trim_end_matches('/');
    url.path().starts_with(seed_path)
}

static SKIP_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".otf", ".eot", ".pdf", ".zip", ".tar", ".gz",
];

/// Skip static-asset extensions, API endpoints, asset directories, search
/// result pages, auth paths and explicit error pages.
#[must_use]
pub fn should_skip(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let path = parsed.path().to_ascii_lowercase();

    if SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }
    let skip_prefixes = [
        "/api/", "/assets/", "/images/", "/downloads/", "/search", "/login", "/logout",
        "/signin", "/signup", "/auth/", "/404", "/500",
    ];
    skip_prefixes.iter().any(|p| path.starts_with(p) || path == *p)
}
