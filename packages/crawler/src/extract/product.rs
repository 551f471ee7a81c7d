//! Product detail extraction: title, price, currency, images, summary, and
//! a free-form specs table.

use std::collections::HashMap;

use scraper::{Html, Selector};
use serde_json::Value as Json;

use crate::error::CrawlerError;

use super::{attr, resolve_href, text_of};

/// A fully-resolved product record, minus `category_id` (attached by the
/// caller, since extraction has no notion of which category a job belongs
/// to) and `image_urls` (left as source URLs; the caller runs these through
/// the image pipeline before persisting).
pub struct ProductExtract {
    pub title: String,
    pub source_id: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_source_urls: Vec<String>,
    pub summary: Option<String>,
    pub specs: Json,
    pub available: bool,
}

pub fn extract(document: &Html, base_url: &str) -> Result<ProductExtract, CrawlerError> {
    let title_selector = sel("[data-datashelf-product-title]")?;
    let price_selector = sel("[data-datashelf-price]")?;
    let summary_selector = sel("[data-datashelf-summary]")?;
    let image_selector = sel("[data-datashelf-image]")?;
    let spec_row_selector = sel("[data-datashelf-spec]")?;
    let availability_selector = sel("[data-datashelf-availability]")?;

    let title = document
        .select(&title_selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CrawlerError::Validation("product page is missing a title".into()))?;

    let source_id = document
        .select(&title_selector)
        .next()
        .and_then(|el| attr(el, "data-source-id"))
        .map(str::to_string);

    let (price, currency) = document
        .select(&price_selector)
        .next()
        .map(|el| {
            let currency = attr(el, "data-currency").map(str::to_string);
            let price = parse_price(&text_of(el));
            (price, currency)
        })
        .unwrap_or((None, None));

    let summary = document
        .select(&summary_selector)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty());

    let mut image_source_urls = Vec::new();
    for element in document.select(&image_selector) {
        let src = attr(element, "src").or_else(|| attr(element, "href"));
        if let Some(src) = src {
            image_source_urls.push(resolve_href(base_url, src)?);
        }
    }

    let mut specs = HashMap::new();
    for element in document.select(&spec_row_selector) {
        if let (Some(key), value) = (attr(element, "data-spec-key"), text_of(element)) {
            if !key.is_empty() && !value.is_empty() {
                specs.insert(key.to_string(), Json::String(value));
            }
        }
    }

    let available = document
        .select(&availability_selector)
        .next()
        .map(|el| attr(el, "data-unavailable").is_none())
        .unwrap_or(true);

    Ok(ProductExtract {
        title,
        source_id,
        price,
        currency,
        image_source_urls,
        summary,
        specs: Json::Object(specs.into_iter().collect()),
        available,
    })
}

fn sel(selector: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(selector).map_err(|e| CrawlerError::Fatal(format!("invalid selector {selector}: {e:?}")))
}

/// Parses a price string like `"$1,299.00"` or `"1299.00"` into a plain
/// `f64`, stripping currency symbols and thousands separators.
fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_complete_product() {
        let html = Html::parse_document(
            r#"
            <html><body>
                <h1 data-datashelf-product-title data-source-id="SKU-1">Widget</h1>
                <span data-datashelf-price data-currency="USD">$1,299.00</span>
                <p data-datashelf-summary>A fine widget.</p>
                <img data-datashelf-image src="/img/widget-1.jpg" />
                <img data-datashelf-image src="/img/widget-2.jpg" />
                <li data-datashelf-spec data-spec-key="color">Red</li>
            </body></html>
            "#,
        );

        let extracted = extract(&html, "https://shop.example.com/product/widget").unwrap();
        assert_eq!(extracted.title, "Widget");
        assert_eq!(extracted.source_id.as_deref(), Some("SKU-1"));
        assert_eq!(extracted.price, Some(1299.00));
        assert_eq!(extracted.currency.as_deref(), Some("USD"));
        assert_eq!(extracted.image_source_urls.len(), 2);
        assert!(extracted.available);
    }

    #[test]
    fn missing_title_is_a_validation_error() {
        let html = Html::parse_document("<html><body></body></html>");
        let result = extract(&html, "https://shop.example.com/product/widget");
        assert!(result.is_err());
    }

    #[test]
    fn parse_price_strips_symbols_and_separators() {
        assert_eq!(parse_price("$1,299.00"), Some(1299.00));
        assert_eq!(parse_price("free"), None);
    }
}
