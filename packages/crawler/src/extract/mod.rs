//! Field extraction: pure `DOM → StructuredRecord` functions, one module
//! per job type. Extraction proper is an external collaborator's contract
//! (sites vary in markup); this module supplies the default reference
//! implementation against a small set of `data-datashelf-*` microdata
//! attributes, so callers can swap in a site-specific extractor behind the
//! same function signatures without touching the worker loop.

pub mod category;
pub mod navigation;
pub mod product;

use scraper::ElementRef;
use url::Url;

use crate::error::CrawlerError;

/// Resolve `href` against `base_url`, returning an absolute URL string.
pub(crate) fn resolve_href(base_url: &str, href: &str) -> Result<String, CrawlerError> {
    if let Ok(url) = Url::parse(href) {
        return Ok(url.to_string());
    }
    let base = Url::parse(base_url)?;
    Ok(base.join(href)?.to_string())
}

pub(crate) fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub(crate) fn attr<'a>(element: ElementRef<'a>, name: &str) -> Option<&'a str> {
    element.value().attr(name)
}
