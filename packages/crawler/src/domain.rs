//! Core domain records: navigation tree, categories, products, and jobs.
//!
//! These mirror the relational schema in `packages/server/migrations` and
//! are owned exclusively by [`crate::repository::Repository`] (navigation/
//! category/product) and [`crate::queue::JobQueue`] (jobs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::CrawlerError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NavigationNode {
    pub id: Uuid,
    pub title: String,
    pub source_url: String,
    pub parent_id: Option<Uuid>,
    pub last_scraped_at: DateTime<Utc>,
}

/// A navigation node as submitted by an extractor, before it has been
/// assigned an id or a `last_scraped_at` timestamp.
#[derive(Debug, Clone)]
pub struct NewNavigationNode {
    pub title: String,
    pub source_url: String,
    pub parent_source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: Uuid,
    pub navigation_id: Option<Uuid>,
    pub title: String,
    pub source_url: String,
    pub product_count: i64,
    pub last_scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub navigation_id: Option<Uuid>,
    pub title: String,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub title: String,
    pub source_url: String,
    pub source_id: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_urls: Vec<String>,
    pub summary: Option<String>,
    pub specs: Json,
    pub available: bool,
    pub last_scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub category_id: Option<Uuid>,
    pub title: String,
    pub source_url: String,
    pub source_id: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_urls: Vec<String>,
    pub summary: Option<String>,
    pub specs: Json,
    pub available: bool,
}

impl NewNavigationNode {
    pub fn validate(&self) -> Result<(), CrawlerError> {
        validate_title(&self.title)?;
        validate_source_url(&self.source_url)?;
        Ok(())
    }
}

impl NewCategory {
    pub fn validate(&self) -> Result<(), CrawlerError> {
        validate_title(&self.title)?;
        validate_source_url(&self.source_url)?;
        Ok(())
    }
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), CrawlerError> {
        validate_title(&self.title)?;
        validate_source_url(&self.source_url)?;
        if let Some(price) = self.price {
            if price < 0.0 {
                return Err(CrawlerError::Validation("price must be >= 0".into()));
            }
        }
        if let Some(currency) = &self.currency {
            if currency.chars().count() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(CrawlerError::Validation(format!(
                    "currency must be a 3-letter ISO-4217 code, got {currency:?}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), CrawlerError> {
    if title.trim().is_empty() {
        return Err(CrawlerError::Validation("title must not be empty".into()));
    }
    Ok(())
}

fn validate_source_url(source_url: &str) -> Result<(), CrawlerError> {
    url::Url::parse(source_url)
        .map_err(|e| CrawlerError::Validation(format!("source_url is not a valid URL: {e}")))?;
    Ok(())
}

/// Offset-pagination sort orders accepted by the repository's category/product
/// listing queries. `price_asc`/`price_desc` place nulls last regardless of
/// direction; all orders break ties by `id` for stability across pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    TitleAsc,
    TitleDesc,
    PriceAsc,
    PriceDesc,
    CreatedAtDesc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "title_asc" => Some(Self::TitleAsc),
            "title_desc" => Some(Self::TitleDesc),
            "price_asc" => Some(Self::PriceAsc),
            "price_desc" => Some(Self::PriceDesc),
            "created_at_desc" => Some(Self::CreatedAtDesc),
            _ => None,
        }
    }

    /// `ORDER BY` clause fragment, safe to splice directly since it is drawn
    /// from a fixed enum rather than user input.
    pub fn order_by_clause(self) -> &'static str {
        match self {
            Self::TitleAsc => "title ASC, id ASC",
            Self::TitleDesc => "title DESC, id ASC",
            Self::PriceAsc => "price ASC NULLS LAST, id ASC",
            Self::PriceDesc => "price DESC NULLS LAST, id ASC",
            Self::CreatedAtDesc => "last_scraped_at DESC, id ASC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Navigation,
    Category,
    Product,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Navigation => "navigation",
            JobType::Category => "category",
            JobType::Product => "product",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "navigation" => Some(Self::Navigation),
            "category" => Some(Self::Category),
            "product" => Some(Self::Product),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub target_url: String,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `priority` is clamped into `[0, 10]`.
    pub fn clamp_priority(priority: i32) -> i32 {
        priority.clamp(0, 10)
    }
}
