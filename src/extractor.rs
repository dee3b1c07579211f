//! Pure HTML extraction.
//!
//! Grounded on `original_source/backend/src/async_spring_scraper_enhanced.py`'s
//! `extract_reference_template`/`extract_api_template` for container
//! discovery order (`article.doc` for reference, `main`/`body` for api) and
//! template-skin extraction, and
//! `original_source/backend/src/models/scraper_models.py::NavigationItem`
//! for the nav-tree shape.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};

use crate::types::{DocKind, NavigationItem, ScrapedContent};

/// Parses a page and extracts its content, or `None` if no recognizable
/// content container exists for the given `DocKind`.
#[must_use]
pub fn extract(html: &str, kind: DocKind, project: &str) -> Option<ScrapedContent> {
    let doc = Html::parse_document(html);

    let container = locate_container(&doc, kind)?;
    let title = extract_title(&doc, &container);
    let body_html = container.html();
    let nav_tree = find_navigation(&doc);

    Some(ScrapedContent {
        title,
        body_html,
        nav_tree,
        kind,
        project: project.to_string(),
        scraped_at: Utc::now(),
    })
}

fn locate_container<'a>(doc: &'a Html, kind: DocKind) -> Option<ElementRef<'a>> {
    let candidates: &[&str] = match kind {
        DocKind::Reference => &["article.doc"],
        DocKind::Api => &["main", "body"],
    };

    for selector_str in candidates {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = doc.select(&selector).next() {
                return Some(el);
            }
        }
    }
    None
}

fn extract_title(doc: &Html, container: &ElementRef<'_>) -> String {
    if let Ok(h1) = Selector::parse("h1") {
        if let Some(el) = container.select(&h1).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
    }
    if let Ok(title_sel) = Selector::parse("title") {
        if let Some(el) = doc.select(&title_sel).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
    }
    "Untitled".to_string()
}

/// Returns the direct child elements of `el` whose tag name is `name`.
fn direct_children<'a>(el: &ElementRef<'a>, name: &str) -> Vec<ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == name)
        .collect()
}

/// The first direct child `ul`/`ol`, if any.
fn direct_list_child<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap).find(|c| {
        let name = c.value().name();
        name == "ul" || name == "ol"
    })
}

fn first_link_text_href(li: &ElementRef<'_>) -> Option<(String, String)> {
    let link = direct_children(li, "a").into_iter().next()?;
    let text = link.text().collect::<String>().trim().to_string();
    let href = link.value().attr("href").unwrap_or_default().to_string();
    Some((text, href))
}

/// Find the first navigation menu container; enumerate top-level items;
/// for each, record text/href and recurse one level into a nested list.
fn find_navigation(doc: &Html) -> Option<NavigationItem> {
    let nav_selector = Selector::parse("nav").ok()?;
    let nav_el = doc.select(&nav_selector).next()?;

    let top_list = direct_list_child(&nav_el).unwrap_or(nav_el);
    let top_items = direct_children(&top_list, "li");

    let mut children = Vec::new();
    for li in top_items {
        let Some((text, href)) = first_link_text_href(&li) else {
            continue;
        };

        let mut grandchildren = Vec::new();
        if let Some(nested_list) = direct_list_child(&li) {
            for nested_li in direct_children(&nested_list, "li") {
                if let Some((nested_text, nested_href)) = first_link_text_href(&nested_li) {
                    grandchildren.push(NavigationItem {
                        text: nested_text,
                        href: nested_href,
                        children: Vec::new(),
                    });
                }
            }
        }

        children.push(NavigationItem {
            text,
            href,
            children: grandchildren,
        });
    }

    Some(NavigationItem {
        text: String::new(),
        href: String::new(),
        children,
    })
}

/// Clone the parsed tree, empty the main content container, and insert a
/// placeholder marker, producing the per-`DocKind` skin.
#[must_use]
pub fn extract_template_skin(html: &str, kind: DocKind) -> Option<String> {
    let doc = Html::parse_document(html);
    let container = locate_container(&doc, kind)?;
    let container_html = container.html();
    let placeholder = r#"<div id="content-placeholder"></div>"#;
    Some(html.replacen(&container_html, placeholder, 1))
}
