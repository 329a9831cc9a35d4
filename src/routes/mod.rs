//! API Routes

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod billing;
pub mod graphs;
pub mod health;
pub mod notifications;
pub mod proposals;
pub mod reports;
pub mod trends;
pub mod usage;
pub mod webhooks;

/// `?limit=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Parse a resource id from the path. Ids that cannot exist are not found.
pub(crate) fn resource_id(raw: &str, not_found: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(not_found.to_string()))
}
