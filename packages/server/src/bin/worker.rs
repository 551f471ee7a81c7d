//! Scraper worker pool binary: leases jobs from the same Postgres-backed
//! queue the read API's job-intake endpoint writes to, and runs them
//! through the crawler crate's worker loop (C6).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use datashelf_server::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawler::{
    run_lease_sweeper, HttpPageFetcher, ImagePipeline, JobQueue, LocalImageStore, PageFetcher,
    PostgresJobQueue, PostgresRepository, RateLimiter, Repository, SlidingWindowRateLimiter, Worker,
    WorkerConfig, WorkerPool,
};

/// Politeness defaults for the per-source-host crawl rate limit. Not
/// env-configurable: the API rate-limit and revalidation rate-limit keys
/// govern different budgets (inbound reads and the revalidation trigger),
/// not outbound scraping, so these stay fixed.
const WORKER_HOST_RATE_LIMIT_PER_MINUTE: usize = 30;
const WORKER_HOST_RATE_LIMIT_PER_HOUR: usize = 600;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,datashelf=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting DataShelf scraper workers");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections((config.worker_pool_size as u32 + 2).max(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let repository: Arc<dyn Repository> = Arc::new(PostgresRepository::new(pool.clone()));
    let job_queue: Arc<dyn JobQueue> = Arc::new(
        PostgresJobQueue::new(pool).with_lease_duration((config.job_lease_ttl_ms / 1000).max(1) as i64),
    );
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(SlidingWindowRateLimiter::new(
        WORKER_HOST_RATE_LIMIT_PER_MINUTE,
        WORKER_HOST_RATE_LIMIT_PER_HOUR,
    ));
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpPageFetcher::new());
    let image_store = Arc::new(LocalImageStore::new(
        config.blob_root.clone(),
        config.blob_public_base_url.clone(),
    ));
    let images = Arc::new(ImagePipeline::with_limits(
        image_store,
        config.image_max_bytes,
        Duration::from_millis(config.image_fetch_timeout_ms),
    ));

    let worker_config = WorkerConfig {
        poll_interval: Duration::from_millis(config.job_poll_interval_ms),
        max_attempts: config.job_max_attempts,
        ..WorkerConfig::default()
    };

    let workers: Vec<Worker> = (0..config.worker_pool_size.max(1))
        .map(|i| {
            Worker::new(
                format!("worker-{i}"),
                job_queue.clone(),
                repository.clone(),
                rate_limiter.clone(),
                fetcher.clone(),
                images.clone(),
                WorkerConfig {
                    poll_interval: worker_config.poll_interval,
                    max_category_pages: worker_config.max_category_pages,
                    max_attempts: worker_config.max_attempts,
                },
            )
        })
        .collect();

    tracing::info!(count = workers.len(), "worker pool starting");
    let worker_pool = WorkerPool::spawn(workers);

    let shutdown = CancellationToken::new();

    let sweep_interval = Duration::from_millis(config.job_lease_ttl_ms).max(Duration::from_secs(1));
    let sweeper = tokio::spawn(run_lease_sweeper(job_queue.clone(), sweep_interval, shutdown.clone()));

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining workers");
        shutdown_signal.cancel();
    });

    shutdown.cancelled().await;
    worker_pool.shutdown().await;
    let _ = sweeper.await;

    Ok(())
}
