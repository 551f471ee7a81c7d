//! Navigation tree extraction: `[data-datashelf-nav]` anchors, each
//! optionally carrying `data-parent-url` for tree structure.

use scraper::{Html, Selector};

use crate::domain::NewNavigationNode;
use crate::error::CrawlerError;

use super::{attr, resolve_href, text_of};

/// Extracted navigation nodes plus the category links discovered alongside
/// them, so the worker can emit one `category` job per link.
pub struct NavigationExtract {
    pub nodes: Vec<NewNavigationNode>,
    pub category_links: Vec<String>,
}

pub fn extract(document: &Html, base_url: &str) -> Result<NavigationExtract, CrawlerError> {
    let nav_selector = Selector::parse("[data-datashelf-nav]")
        .map_err(|e| CrawlerError::Fatal(format!("invalid nav selector: {e:?}")))?;
    let category_selector = Selector::parse("[data-datashelf-category-link]")
        .map_err(|e| CrawlerError::Fatal(format!("invalid category link selector: {e:?}")))?;

    let mut nodes = Vec::new();
    for element in document.select(&nav_selector) {
        let Some(href) = attr(element, "href") else {
            continue;
        };
        let title = text_of(element);
        if title.is_empty() {
            continue;
        }
        let source_url = resolve_href(base_url, href)?;
        let parent_source_url = attr(element, "data-parent-url")
            .map(|parent| resolve_href(base_url, parent))
            .transpose()?;

        nodes.push(NewNavigationNode {
            title,
            source_url,
            parent_source_url,
        });
    }

    let mut category_links = Vec::new();
    for element in document.select(&category_selector) {
        if let Some(href) = attr(element, "href") {
            category_links.push(resolve_href(base_url, href)?);
        }
    }

    Ok(NavigationExtract { nodes, category_links })
}
