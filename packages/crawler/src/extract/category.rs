//! Category page extraction: the category's own metadata, its product
//! listing links, and an optional next-page link for pagination.

use scraper::{Html, Selector};

use crate::error::CrawlerError;

use super::{attr, resolve_href, text_of};

pub struct CategoryExtract {
    pub title: Option<String>,
    pub product_links: Vec<String>,
    pub next_page_url: Option<String>,
}

pub fn extract(document: &Html, base_url: &str) -> Result<CategoryExtract, CrawlerError> {
    let title_selector = Selector::parse("[data-datashelf-category-title]")
        .map_err(|e| CrawlerError::Fatal(format!("invalid category title selector: {e:?}")))?;
    let product_selector = Selector::parse("[data-datashelf-product-link]")
        .map_err(|e| CrawlerError::Fatal(format!("invalid product link selector: {e:?}")))?;
    let next_page_selector = Selector::parse("[data-datashelf-next-page]")
        .map_err(|e| CrawlerError::Fatal(format!("invalid next page selector: {e:?}")))?;

    let title = document
        .select(&title_selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty());

    let mut product_links = Vec::new();
    for element in document.select(&product_selector) {
        if let Some(href) = attr(element, "href") {
            product_links.push(resolve_href(base_url, href)?);
        }
    }

    let next_page_url = document
        .select(&next_page_selector)
        .next()
        .and_then(|element| attr(element, "href"))
        .map(|href| resolve_href(base_url, href))
        .transpose()?;

    Ok(CategoryExtract {
        title,
        product_links,
        next_page_url,
    })
}

/// Maximum number of category pages a single job will paginate through,
/// guarding against an infinite "next page" loop on a misbehaving site.
pub const MAX_PAGES: u32 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_links_and_next_page() {
        let html = Html::parse_document(
            r#"
            <html><body>
                <h1 data-datashelf-category-title>Smartphones</h1>
                <a data-datashelf-product-link href="/p/1">Phone 1</a>
                <a data-datashelf-product-link href="/p/2">Phone 2</a>
                <a data-datashelf-next-page href="?page=2">Next</a>
            </body></html>
            "#,
        );

        let extracted = extract(&html, "https://shop.example.com/category/smartphones").unwrap();
        assert_eq!(extracted.title.as_deref(), Some("Smartphones"));
        assert_eq!(extracted.product_links.len(), 2);
        assert!(extracted.next_page_url.unwrap().contains("page=2"));
    }

    #[test]
    fn next_page_is_none_on_last_page() {
        let html = Html::parse_document(r#"<h1 data-datashelf-category-title>Smartphones</h1>"#);
        let extracted = extract(&html, "https://shop.example.com/category/smartphones").unwrap();
        assert!(extracted.next_page_url.is_none());
    }
}
