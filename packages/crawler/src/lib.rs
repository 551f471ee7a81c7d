pub mod domain;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod image_pipeline;
pub mod queue;
pub mod rate_limiter;
pub mod repository;
pub mod signer;
pub mod worker;

pub use domain::{
    Category, Job, JobStatus, JobType, NavigationNode, NewCategory, NewNavigationNode, NewProduct,
    Product, SortOrder,
};
pub use error::CrawlerError;
pub use fetcher::{HttpPageFetcher, PageFetcher};
pub use image_pipeline::{ImageOutcome, ImagePipeline, ImageStore, LocalImageStore};
pub use queue::{run_lease_sweeper, EnqueueResult, JobQueue, PostgresJobQueue};
pub use rate_limiter::{RateLimitDecision, RateLimiter, SlidingWindowRateLimiter};
pub use repository::{Page, PostgresRepository, Repository};
pub use signer::Signer;
pub use worker::{Worker, WorkerConfig, WorkerPool};
