//! Route handlers for the read API (C9) and signed job intake.

pub mod categories;
pub mod health;
pub mod jobs;
pub mod navigation;
pub mod products;

/// Shared query-parameter validation: `limit` clamps into `[1, 100]`
/// (default 20), `offset` must be non-negative (default 0).
pub(crate) fn validate_limit(limit: Option<i64>) -> Result<i64, crate::error::ApiError> {
    let limit = limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(crate::error::ApiError::Validation(
            "limit must be between 1 and 100".to_string(),
        ));
    }
    Ok(limit)
}

pub(crate) fn validate_offset(offset: Option<i64>) -> Result<i64, crate::error::ApiError> {
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(crate::error::ApiError::Validation(
            "offset must be >= 0".to_string(),
        ));
    }
    Ok(offset)
}
