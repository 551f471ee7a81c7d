//! DataShelf read API: the SWR cache (C7) and revalidation bridge (C8)
//! fronting the crawler crate's repository and job queue (C1/C2), exposed
//! over the axum read API surface (C9) and the signed job intake endpoint.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod server;

pub use config::Config;
pub use error::ApiError;
