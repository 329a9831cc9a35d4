//! Cross-tenant admin endpoints

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiResult;
use crate::extract::Json;
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::{models::*, ApiState};

const STATS_LIMIT: usize = 50;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/cross-org-stats", get(cross_org_stats))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CrossOrgStats {
    pub tenants: Vec<TenantStats>,
}

/// Usage aggregated across all tenants, busiest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/cross-org-stats",
    responses(
        (status = 200, description = "Per-tenant usage", body = CrossOrgStats),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn cross_org_stats(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
) -> ApiResult<Json<ApiResponse<CrossOrgStats>>> {
    user.require(Permission::TenantsAdmin)?;

    let tenants = state.store.tenants.tenant_stats(STATS_LIMIT).await?;
    Ok(Json(ApiResponse::success(CrossOrgStats { tenants })))
}
