//! Scraper workers (C6): lease a job from the queue, rate-limit by source
//! host, render, extract by job type, persist, and emit child jobs.
//!
//! Shutdown is a [`CancellationToken`] checked in a single `tokio::select!`
//! alongside the poll loop: stop dequeuing, drain in-flight work, release
//! locks. No broader supervision tree is needed here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::{Job, JobType, NewCategory, NewProduct};
use crate::error::CrawlerError;
use crate::extract::{category, navigation, product};
use crate::fetcher::PageFetcher;
use crate::image_pipeline::{ImageBatchStats, ImageOutcome};
use crate::queue::JobQueue;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::repository::Repository;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process_batch(&self, base_url: &str, image_urls: &[String]) -> (Vec<ImageOutcome>, ImageBatchStats);
}

#[async_trait]
impl<S: crate::image_pipeline::ImageStore + 'static> ImageProcessor for crate::image_pipeline::ImagePipeline<S> {
    async fn process_batch(&self, base_url: &str, image_urls: &[String]) -> (Vec<ImageOutcome>, ImageBatchStats) {
        crate::image_pipeline::ImagePipeline::process_batch(self, base_url, image_urls).await
    }
}

pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_category_pages: u32,
    /// Applied to every child job a worker emits (category links from a
    /// navigation page, product links from a category page) so
    /// internally-chained jobs retry to the same budget as
    /// externally-submitted ones.
    pub max_attempts: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_category_pages: category::MAX_PAGES,
            max_attempts: crate::queue::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

pub struct Worker {
    pub worker_id: String,
    queue: Arc<dyn JobQueue>,
    repository: Arc<dyn Repository>,
    rate_limiter: Arc<dyn RateLimiter>,
    fetcher: Arc<dyn PageFetcher>,
    images: Arc<dyn ImageProcessor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        repository: Arc<dyn Repository>,
        rate_limiter: Arc<dyn RateLimiter>,
        fetcher: Arc<dyn PageFetcher>,
        images: Arc<dyn ImageProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            repository,
            rate_limiter,
            fetcher,
            images,
            config,
        }
    }

    fn host_of(url: &str) -> Result<String, CrawlerError> {
        Url::parse(url)?
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| CrawlerError::Validation(format!("url has no host: {url}")))
    }

    /// Run one iteration: claim at most one job, process it to completion
    /// or failure. Returns `true` if a job was claimed (caller should loop
    /// again immediately), `false` if the queue was empty (caller should
    /// sleep for the poll interval).
    pub async fn run_once(&self) -> Result<bool, CrawlerError> {
        let mut claimed = self.queue.claim(&self.worker_id, 1).await?;
        let Some(job) = claimed.pop() else {
            return Ok(false);
        };

        let host = match Self::host_of(&job.target_url) {
            Ok(host) => host,
            Err(e) => {
                // A malformed target_url is a poison job: fail it outright
                // so it consumes retries toward dead-lettering.
                self.queue.fail(job.id, &e.to_string()).await?;
                return Ok(true);
            }
        };

        match self.rate_limiter.acquire(&host).await {
            RateLimitDecision::Allow => {}
            RateLimitDecision::Deny { .. } => {
                // Denial does not consume an attempt beyond the increment
                // already taken by claim(); release puts it straight back
                // to `queued` without touching `attempts`.
                self.queue.release(job.id).await?;
                return Ok(true);
            }
        }

        if let Err(e) = self.process(&job).await {
            tracing::warn!(job_id = %job.id, job_type = ?job.job_type, error = %e, "job failed");
            self.queue.fail(job.id, &e.to_string()).await?;
            return Ok(true);
        }

        Ok(true)
    }

    /// Lock hygiene on shutdown: release every lease this worker still
    /// holds so it doesn't linger at the full lease TTL after the worker
    /// has already stopped processing.
    pub async fn release_locks(&self) -> Result<(), CrawlerError> {
        let released = self.queue.release_by_worker(&self.worker_id).await?;
        if released > 0 {
            tracing::info!(worker_id = %self.worker_id, released, "released locks on shutdown");
        }
        Ok(())
    }

    async fn process(&self, job: &Job) -> Result<(), CrawlerError> {
        match job.job_type {
            JobType::Navigation => self.process_navigation(job).await,
            JobType::Category => self.process_category(job).await,
            JobType::Product => self.process_product(job).await,
        }
    }

    async fn process_navigation(&self, job: &Job) -> Result<(), CrawlerError> {
        // `FetchedPage::document` is a `scraper::Html`, which is `!Send`
        // (its tree stores non-atomic `StrTendril`s). Extract the owned
        // data we need and let the page drop before the next `.await`, or
        // the worker loop's future stops being `Send` and `tokio::spawn`
        // refuses it.
        let extracted = {
            let page = self.fetcher.fetch(&job.target_url).await?;
            navigation::extract(&page.document, &page.final_url)?
        };

        let mut upserted = 0usize;
        for node in extracted.nodes {
            self.repository.upsert_navigation(node).await?;
            upserted += 1;
        }

        for link in &extracted.category_links {
            self.queue
                .enqueue(JobType::Category, link, 1, json!({}), self.config.max_attempts)
                .await?;
        }

        self.queue
            .complete(
                job.id,
                json!({ "nodes_upserted": upserted, "categories_enqueued": extracted.category_links.len() }),
            )
            .await
    }

    async fn process_category(&self, job: &Job) -> Result<(), CrawlerError> {
        let navigation_id = job
            .metadata
            .get("navigation_id")
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok());

        let mut products_enqueued = 0usize;
        let mut next_url = Some(job.target_url.clone());
        let mut pages_visited = 0u32;
        // Resolved from the first page that carries a title, then reused for
        // every product link on every subsequent page.
        let mut category_id: Option<uuid::Uuid> = None;

        while let Some(url) = next_url.take() {
            if pages_visited >= self.config.max_category_pages {
                break;
            }
            pages_visited += 1;

            // See the comment in `process_navigation`: drop the `!Send`
            // `Html` document before the next `.await`.
            let extracted = {
                let page = self.fetcher.fetch(&url).await?;
                category::extract(&page.document, &page.final_url)?
            };

            if category_id.is_none() {
                if let Some(title) = extracted.title.clone() {
                    let category = self
                        .repository
                        .upsert_category(NewCategory {
                            navigation_id,
                            title,
                            source_url: job.target_url.clone(),
                        })
                        .await?;
                    category_id = Some(category.id);
                }
            }

            for link in &extracted.product_links {
                self.queue
                    .enqueue(JobType::Product, link, 2, json!({ "category_id": category_id }), self.config.max_attempts)
                    .await?;
                products_enqueued += 1;
            }

            next_url = extracted.next_page_url;
        }

        self.queue
            .complete(
                job.id,
                json!({ "pages_visited": pages_visited, "products_enqueued": products_enqueued }),
            )
            .await
    }

    async fn process_product(&self, job: &Job) -> Result<(), CrawlerError> {
        let category_id = job
            .metadata
            .get("category_id")
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok());

        // See the comment in `process_navigation`: drop the `!Send` `Html`
        // document before the next `.await`.
        let (extracted, final_url) = {
            let page = self.fetcher.fetch(&job.target_url).await?;
            let extracted = product::extract(&page.document, &page.final_url)?;
            (extracted, page.final_url)
        };

        let (outcomes, stats) = self
            .images
            .process_batch(&final_url, &extracted.image_source_urls)
            .await;
        let image_urls: Vec<String> = outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect();

        let new_product = NewProduct {
            category_id,
            title: extracted.title,
            source_url: final_url,
            source_id: extracted.source_id,
            price: extracted.price,
            currency: extracted.currency,
            image_urls,
            summary: extracted.summary,
            specs: extracted.specs,
            available: extracted.available,
        };

        self.repository.upsert_product(new_product).await?;

        self.queue
            .complete(
                job.id,
                json!({ "images_succeeded": stats.succeeded, "images_failed": stats.failed }),
            )
            .await
    }
}

/// Runs `worker` in a loop until `shutdown` is cancelled, sleeping for the
/// configured poll interval whenever the queue is empty.
pub async fn run_worker_loop(worker: Arc<Worker>, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match worker.run_once().await {
            Ok(true) => continue,
            Ok(false) => {
                tokio::select! {
                    _ = tokio::time::sleep(worker.config.poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
            Err(e) => {
                tracing::error!(worker_id = %worker.worker_id, error = %e, "worker loop error");
                tokio::select! {
                    _ = tokio::time::sleep(worker.config.poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }
    }
}

/// A bounded pool of worker tasks sharing one queue/repository/etc
/// (default N=4 parallel scraper tasks).
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
    workers: Vec<Arc<Worker>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let shutdown = CancellationToken::new();
        let workers: Vec<Arc<Worker>> = workers.into_iter().map(Arc::new).collect();
        let handles = workers
            .iter()
            .cloned()
            .map(|worker| {
                let token = shutdown.clone();
                tokio::spawn(run_worker_loop(worker, token))
            })
            .collect();

        Self { handles, workers, shutdown }
    }

    /// Signal all workers to drain and stop, wait for them to exit, then
    /// release any locks they still hold (lock hygiene: a worker that
    /// exits mid-lease shouldn't leave it pinned for the full lease TTL).
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        for worker in &self.workers {
            if let Err(e) = worker.release_locks().await {
                tracing::warn!(worker_id = %worker.worker_id, error = %e, "failed to release locks on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, NavigationNode, NewNavigationNode, Product, SortOrder};
    use crate::queue::EnqueueResult;
    use crate::rate_limiter::RateLimitDecision;
    use crate::repository::Page;
    use scraper::Html;
    use std::sync::Mutex;

    struct MockFetcher {
        html: String,
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<crate::fetcher::FetchedPage, CrawlerError> {
            Ok(crate::fetcher::FetchedPage {
                final_url: url.to_string(),
                status: 200,
                document: Html::parse_document(&self.html),
            })
        }
    }

    struct AlwaysAllow;

    #[async_trait]
    impl RateLimiter for AlwaysAllow {
        async fn acquire(&self, _key: &str) -> RateLimitDecision {
            RateLimitDecision::Allow
        }

        async fn usage(&self, _key: &str) -> (usize, usize) {
            (0, 0)
        }
    }

    struct NoopImages;

    #[async_trait]
    impl ImageProcessor for NoopImages {
        async fn process_batch(&self, _base_url: &str, _image_urls: &[String]) -> (Vec<ImageOutcome>, ImageBatchStats) {
            (vec![], ImageBatchStats::default())
        }
    }

    #[derive(Default)]
    struct MockRepository {
        navigation_upserts: Mutex<Vec<NewNavigationNode>>,
        category_upserts: Mutex<Vec<Category>>,
    }

    #[async_trait]
    impl Repository for MockRepository {
        async fn upsert_navigation(&self, node: NewNavigationNode) -> Result<NavigationNode, CrawlerError> {
            self.navigation_upserts.lock().unwrap().push(node.clone());
            Ok(NavigationNode {
                id: uuid::Uuid::now_v7(),
                title: node.title,
                source_url: node.source_url,
                parent_id: None,
                last_scraped_at: chrono::Utc::now(),
            })
        }
        async fn upsert_category(&self, category: NewCategory) -> Result<Category, CrawlerError> {
            let stored = Category {
                id: uuid::Uuid::now_v7(),
                navigation_id: category.navigation_id,
                title: category.title,
                source_url: category.source_url,
                product_count: 0,
                last_scraped_at: chrono::Utc::now(),
            };
            self.category_upserts.lock().unwrap().push(stored.clone());
            Ok(stored)
        }
        async fn upsert_product(&self, product: NewProduct) -> Result<Product, CrawlerError> {
            Ok(Product {
                id: uuid::Uuid::now_v7(),
                category_id: product.category_id,
                title: product.title,
                source_url: product.source_url,
                source_id: product.source_id,
                price: product.price,
                currency: product.currency,
                image_urls: product.image_urls,
                summary: product.summary,
                specs: product.specs,
                available: product.available,
                last_scraped_at: chrono::Utc::now(),
            })
        }
        async fn get_navigation_by_id(&self, _id: uuid::Uuid) -> Result<NavigationNode, CrawlerError> {
            Err(CrawlerError::NotFound)
        }
        async fn get_navigation_by_source_url(&self, _source_url: &str) -> Result<Option<NavigationNode>, CrawlerError> {
            Ok(None)
        }
        async fn list_navigation(&self) -> Result<Vec<NavigationNode>, CrawlerError> {
            Ok(vec![])
        }
        async fn get_category_by_id(&self, _id: uuid::Uuid) -> Result<Category, CrawlerError> {
            Err(CrawlerError::NotFound)
        }
        async fn get_category_by_source_url(&self, _source_url: &str) -> Result<Option<Category>, CrawlerError> {
            Ok(None)
        }
        async fn list_categories(
            &self,
            _navigation_id: Option<uuid::Uuid>,
            _parent_id: Option<uuid::Uuid>,
            _limit: i64,
            _offset: i64,
        ) -> Result<Page<Category>, CrawlerError> {
            Ok(Page { items: vec![], total: 0 })
        }
        async fn get_product_by_id(&self, _id: uuid::Uuid) -> Result<Product, CrawlerError> {
            Err(CrawlerError::NotFound)
        }
        async fn get_product_by_source_url(&self, _source_url: &str) -> Result<Option<Product>, CrawlerError> {
            Ok(None)
        }
        async fn list_products(
            &self,
            _category_id: Option<uuid::Uuid>,
            _sort: SortOrder,
            _available_only: bool,
            _limit: i64,
            _offset: i64,
        ) -> Result<Page<Product>, CrawlerError> {
            Ok(Page { items: vec![], total: 0 })
        }
    }

    #[derive(Default)]
    struct MockQueue {
        enqueued: Mutex<Vec<(JobType, String, serde_json::Value)>>,
        completed: Mutex<Vec<uuid::Uuid>>,
    }

    #[async_trait]
    impl JobQueue for MockQueue {
        async fn enqueue(
            &self,
            job_type: JobType,
            target_url: &str,
            _priority: i32,
            metadata: serde_json::Value,
            _max_attempts: i32,
        ) -> Result<EnqueueResult, CrawlerError> {
            self.enqueued
                .lock()
                .unwrap()
                .push((job_type, target_url.to_string(), metadata));
            Ok(EnqueueResult::Created(sample_job(job_type, target_url)))
        }
        async fn claim(&self, _worker_id: &str, _limit: i64) -> Result<Vec<Job>, CrawlerError> {
            Ok(vec![])
        }
        async fn complete(&self, job_id: uuid::Uuid, _result: serde_json::Value) -> Result<(), CrawlerError> {
            self.completed.lock().unwrap().push(job_id);
            Ok(())
        }
        async fn fail(&self, _job_id: uuid::Uuid, _error: &str) -> Result<(), CrawlerError> {
            Ok(())
        }
        async fn release(&self, _job_id: uuid::Uuid) -> Result<(), CrawlerError> {
            Ok(())
        }
        async fn release_by_worker(&self, _worker_id: &str) -> Result<u64, CrawlerError> {
            Ok(0)
        }
        async fn sweep_expired_leases(&self) -> Result<u64, CrawlerError> {
            Ok(0)
        }
    }

    fn sample_job(job_type: JobType, target_url: &str) -> Job {
        Job {
            id: uuid::Uuid::now_v7(),
            job_type,
            target_url: target_url.to_string(),
            priority: 0,
            status: crate::domain::JobStatus::Queued,
            attempts: 0,
            max_attempts: 5,
            locked_at: None,
            locked_by: None,
            last_error: None,
            metadata: json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    fn worker_with(html: &str, queue: Arc<dyn JobQueue>, repository: Arc<dyn Repository>) -> Worker {
        Worker::new(
            "test-worker",
            queue,
            repository,
            Arc::new(AlwaysAllow),
            Arc::new(MockFetcher { html: html.to_string() }),
            Arc::new(NoopImages),
            WorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn navigation_job_upserts_nodes_and_enqueues_categories() {
        let queue = Arc::new(MockQueue::default());
        let repository = Arc::new(MockRepository::default());
        let worker = worker_with(
            r#"
            <a data-datashelf-nav href="/electronics">Electronics</a>
            <a data-datashelf-category-link href="/electronics/phones">Phones</a>
            "#,
            queue.clone(),
            repository.clone(),
        );

        let job = sample_job(JobType::Navigation, "https://shop.example.com/");
        worker.process(&job).await.unwrap();

        assert_eq!(repository.navigation_upserts.lock().unwrap().len(), 1);
        assert_eq!(queue.enqueued.lock().unwrap().len(), 1);
        assert_eq!(queue.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn category_job_tags_product_jobs_with_the_resolved_category_id() {
        let queue = Arc::new(MockQueue::default());
        let repository = Arc::new(MockRepository::default());
        let worker = worker_with(
            r#"
            <h1 data-datashelf-category-title>Smartphones</h1>
            <a data-datashelf-product-link href="/p/1">Phone 1</a>
            <a data-datashelf-product-link href="/p/2">Phone 2</a>
            "#,
            queue.clone(),
            repository.clone(),
        );

        let job = sample_job(JobType::Category, "https://shop.example.com/category/smartphones");
        worker.process(&job).await.unwrap();

        let upserted = repository.category_upserts.lock().unwrap();
        assert_eq!(upserted.len(), 1);
        let category_id = upserted[0].id;

        let enqueued = queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 2);
        for (job_type, _, metadata) in enqueued.iter() {
            assert_eq!(*job_type, JobType::Product);
            assert_eq!(
                metadata.get("category_id").and_then(|v| v.as_str()),
                Some(category_id.to_string().as_str())
            );
        }
    }

    #[tokio::test]
    async fn host_of_extracts_hostname() {
        assert_eq!(Worker::host_of("https://shop.example.com/a/b").unwrap(), "shop.example.com");
        assert!(Worker::host_of("not a url").is_err());
    }
}
