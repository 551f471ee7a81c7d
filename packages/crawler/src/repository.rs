//! Repository (C1): idempotent upsert/read for navigation, category, and
//! product rows, with transactional `product_count` maintenance.
//!
//! Upserts use `ON CONFLICT ... DO UPDATE` on the unique `source_url`
//! columns, and the product/category-count adjustment runs inside a single
//! `pool.begin()` transaction so a move between categories never leaves one
//! side's count stale if the other write fails.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{
    Category, NavigationNode, NewCategory, NewNavigationNode, NewProduct, Product, SortOrder,
};
use crate::error::CrawlerError;

/// A page of rows plus the total count matching the filter, for offset
/// pagination (`limit`/`offset` from the caller, `total` so the caller can
/// compute whether further pages exist).
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn upsert_navigation(&self, node: NewNavigationNode) -> Result<NavigationNode, CrawlerError>;
    async fn upsert_category(&self, category: NewCategory) -> Result<Category, CrawlerError>;
    async fn upsert_product(&self, product: NewProduct) -> Result<Product, CrawlerError>;

    async fn get_navigation_by_id(&self, id: Uuid) -> Result<NavigationNode, CrawlerError>;
    async fn get_navigation_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<NavigationNode>, CrawlerError>;
    async fn list_navigation(&self) -> Result<Vec<NavigationNode>, CrawlerError>;

    async fn get_category_by_id(&self, id: Uuid) -> Result<Category, CrawlerError>;
    async fn get_category_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<Category>, CrawlerError>;
    async fn list_categories(
        &self,
        navigation_id: Option<Uuid>,
        parent_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Category>, CrawlerError>;

    async fn get_product_by_id(&self, id: Uuid) -> Result<Product, CrawlerError>;
    async fn get_product_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<Product>, CrawlerError>;
    async fn list_products(
        &self,
        category_id: Option<Uuid>,
        sort: SortOrder,
        available_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Product>, CrawlerError>;
}

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a navigation id from the `source_url` of its parent, if the
    /// parent has already been scraped. Unresolved parents are left unset:
    /// the repository never blocks a child upsert on an out-of-order parent
    /// discovery; a later navigation upsert can still backfill via its own
    /// `parent_id` resolution on the next scrape.
    async fn resolve_navigation_parent(
        &self,
        parent_source_url: Option<&str>,
    ) -> Result<Option<Uuid>, CrawlerError> {
        let Some(parent_url) = parent_source_url else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT id FROM navigation_nodes WHERE source_url = $1")
            .bind(parent_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlerError::database("resolve_navigation_parent", e))?;
        Ok(row.map(|r| r.get::<Uuid, _>("id")))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn upsert_navigation(&self, node: NewNavigationNode) -> Result<NavigationNode, CrawlerError> {
        node.validate()?;
        let parent_id = self
            .resolve_navigation_parent(node.parent_source_url.as_deref())
            .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO navigation_nodes (id, title, source_url, parent_id, last_scraped_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source_url) DO UPDATE
            SET title = EXCLUDED.title,
                parent_id = COALESCE(EXCLUDED.parent_id, navigation_nodes.parent_id),
                last_scraped_at = NOW()
            RETURNING id, title, source_url, parent_id, last_scraped_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&node.title)
        .bind(&node.source_url)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("upsert_navigation", e))?;

        Ok(row_to_navigation(row))
    }

    async fn upsert_category(&self, category: NewCategory) -> Result<Category, CrawlerError> {
        category.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO categories (id, navigation_id, title, source_url, product_count, last_scraped_at)
            VALUES ($1, $2, $3, $4, 0, NOW())
            ON CONFLICT (source_url) DO UPDATE
            SET title = EXCLUDED.title,
                navigation_id = COALESCE(EXCLUDED.navigation_id, categories.navigation_id),
                last_scraped_at = NOW()
            RETURNING id, navigation_id, title, source_url, product_count, last_scraped_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(category.navigation_id)
        .bind(&category.title)
        .bind(&category.source_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("upsert_category", e))?;

        Ok(row_to_category(row))
    }

    async fn upsert_product(&self, product: NewProduct) -> Result<Product, CrawlerError> {
        product.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CrawlerError::database("upsert_product.begin", e))?;

        let previous_category_id =
            sqlx::query("SELECT category_id FROM products WHERE source_url = $1")
                .bind(&product.source_url)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CrawlerError::database("upsert_product.lookup", e))?
                .and_then(|r| r.get::<Option<Uuid>, _>("category_id"));

        let row = sqlx::query(
            r#"
            INSERT INTO products
                (id, category_id, title, source_url, source_id, price, currency,
                 image_urls, summary, specs, available, last_scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (source_url) DO UPDATE
            SET category_id = EXCLUDED.category_id,
                title = EXCLUDED.title,
                source_id = EXCLUDED.source_id,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                image_urls = EXCLUDED.image_urls,
                summary = EXCLUDED.summary,
                specs = EXCLUDED.specs,
                available = EXCLUDED.available,
                last_scraped_at = NOW()
            RETURNING id, category_id, title, source_url, source_id, price, currency,
                      image_urls, summary, specs, available, last_scraped_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(product.category_id)
        .bind(&product.title)
        .bind(&product.source_url)
        .bind(&product.source_id)
        .bind(product.price)
        .bind(&product.currency)
        .bind(&product.image_urls)
        .bind(&product.summary)
        .bind(&product.specs)
        .bind(product.available)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CrawlerError::database("upsert_product.upsert", e))?;

        let new_category_id: Option<Uuid> = row.get("category_id");

        if previous_category_id != new_category_id {
            if let Some(old_id) = previous_category_id {
                sqlx::query(
                    "UPDATE categories SET product_count = product_count - 1 WHERE id = $1",
                )
                .bind(old_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CrawlerError::database("upsert_product.decrement", e))?;
            }
            if let Some(new_id) = new_category_id {
                sqlx::query(
                    "UPDATE categories SET product_count = product_count + 1 WHERE id = $1",
                )
                .bind(new_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| CrawlerError::database("upsert_product.increment", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| CrawlerError::database("upsert_product.commit", e))?;

        Ok(row_to_product(row))
    }

    async fn get_navigation_by_id(&self, id: Uuid) -> Result<NavigationNode, CrawlerError> {
        let row = sqlx::query(
            "SELECT id, title, source_url, parent_id, last_scraped_at FROM navigation_nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_navigation_by_id", e))?;

        row.map(row_to_navigation).ok_or(CrawlerError::NotFound)
    }

    async fn get_navigation_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<NavigationNode>, CrawlerError> {
        let row = sqlx::query(
            "SELECT id, title, source_url, parent_id, last_scraped_at FROM navigation_nodes WHERE source_url = $1",
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_navigation_by_source_url", e))?;

        Ok(row.map(row_to_navigation))
    }

    async fn list_navigation(&self) -> Result<Vec<NavigationNode>, CrawlerError> {
        let rows = sqlx::query(
            "SELECT id, title, source_url, parent_id, last_scraped_at FROM navigation_nodes ORDER BY title ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("list_navigation", e))?;

        Ok(rows.into_iter().map(row_to_navigation).collect())
    }

    async fn get_category_by_id(&self, id: Uuid) -> Result<Category, CrawlerError> {
        let row = sqlx::query(
            "SELECT id, navigation_id, title, source_url, product_count, last_scraped_at FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_category_by_id", e))?;

        row.map(row_to_category).ok_or(CrawlerError::NotFound)
    }

    async fn get_category_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<Category>, CrawlerError> {
        let row = sqlx::query(
            "SELECT id, navigation_id, title, source_url, product_count, last_scraped_at FROM categories WHERE source_url = $1",
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_category_by_source_url", e))?;

        Ok(row.map(row_to_category))
    }

    async fn list_categories(
        &self,
        navigation_id: Option<Uuid>,
        parent_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Category>, CrawlerError> {
        // `parent_id` is accepted for query-surface compatibility, but
        // categories do not themselves nest (only navigation nodes do), so it
        // is treated as a synonym for `navigation_id` when present.
        let nav_filter = parent_id.or(navigation_id);

        let total = sqlx::query(
            "SELECT COUNT(*) AS count FROM categories WHERE ($1::UUID IS NULL OR navigation_id = $1)",
        )
        .bind(nav_filter)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("list_categories.count", e))?
        .get::<i64, _>("count");

        let rows = sqlx::query(
            r#"
            SELECT id, navigation_id, title, source_url, product_count, last_scraped_at
            FROM categories
            WHERE ($1::UUID IS NULL OR navigation_id = $1)
            ORDER BY title ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(nav_filter)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("list_categories", e))?;

        Ok(Page {
            items: rows.into_iter().map(row_to_category).collect(),
            total,
        })
    }

    async fn get_product_by_id(&self, id: Uuid) -> Result<Product, CrawlerError> {
        let row = sqlx::query(
            r#"SELECT id, category_id, title, source_url, source_id, price, currency,
                      image_urls, summary, specs, available, last_scraped_at
               FROM products WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_product_by_id", e))?;

        row.map(row_to_product).ok_or(CrawlerError::NotFound)
    }

    async fn get_product_by_source_url(
        &self,
        source_url: &str,
    ) -> Result<Option<Product>, CrawlerError> {
        let row = sqlx::query(
            r#"SELECT id, category_id, title, source_url, source_id, price, currency,
                      image_urls, summary, specs, available, last_scraped_at
               FROM products WHERE source_url = $1"#,
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("get_product_by_source_url", e))?;

        Ok(row.map(row_to_product))
    }

    async fn list_products(
        &self,
        category_id: Option<Uuid>,
        sort: SortOrder,
        available_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Product>, CrawlerError> {
        let total = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM products
            WHERE ($1::UUID IS NULL OR category_id = $1)
              AND ($2 = false OR available = true)
            "#,
        )
        .bind(category_id)
        .bind(available_only)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("list_products.count", e))?
        .get::<i64, _>("count");

        // `sort.order_by_clause()` is drawn from a closed enum, never user
        // input, so splicing it into the query string is safe.
        let sql = format!(
            r#"
            SELECT id, category_id, title, source_url, source_id, price, currency,
                   image_urls, summary, specs, available, last_scraped_at
            FROM products
            WHERE ($1::UUID IS NULL OR category_id = $1)
              AND ($2 = false OR available = true)
            ORDER BY {}
            LIMIT $3 OFFSET $4
            "#,
            sort.order_by_clause()
        );

        let rows = sqlx::query(&sql)
            .bind(category_id)
            .bind(available_only)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CrawlerError::database("list_products", e))?;

        Ok(Page {
            items: rows.into_iter().map(row_to_product).collect(),
            total,
        })
    }
}

fn row_to_navigation(row: sqlx::postgres::PgRow) -> NavigationNode {
    NavigationNode {
        id: row.get("id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        parent_id: row.get("parent_id"),
        last_scraped_at: row.get("last_scraped_at"),
    }
}

fn row_to_category(row: sqlx::postgres::PgRow) -> Category {
    Category {
        id: row.get("id"),
        navigation_id: row.get("navigation_id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        product_count: row.get("product_count"),
        last_scraped_at: row.get("last_scraped_at"),
    }
}

fn row_to_product(row: sqlx::postgres::PgRow) -> Product {
    Product {
        id: row.get("id"),
        category_id: row.get("category_id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        source_id: row.get("source_id"),
        price: row.get("price"),
        currency: row.get("currency"),
        image_urls: row.get("image_urls"),
        summary: row.get("summary"),
        specs: row.get("specs"),
        available: row.get("available"),
        last_scraped_at: row.get("last_scraped_at"),
    }
}
