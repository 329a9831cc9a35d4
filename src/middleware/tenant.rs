//! Tenant resolution

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Header carrying the caller's tenant
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant of the current request, taken from `X-Tenant-Id`.
///
/// Requests without a non-blank header are rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tenant from the header if present, without rejecting
    pub fn from_headers_opt(headers: &axum::http::HeaderMap) -> Option<Self> {
        headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers_opt(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("X-Tenant-Id header is required".into()))
    }
}
