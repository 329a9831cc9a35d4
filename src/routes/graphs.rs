//! Pipeline graph endpoints

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use super::LimitParams;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::middleware::tenant::TenantId;
use crate::{models::*, ApiState};

const DEFAULT_LIMIT: usize = 50;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_graphs))
        .route("/:id", get(get_graph))
}

/// List stored graphs, most recently updated first
#[utoipa::path(
    get,
    path = "/api/v1/graphs",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum graphs returned (default 50)"),
        ("X-Tenant-Id" = String, Header,)
    ),
    responses(
        (status = 200, description = "Graph summaries", body = [GraphSummary]),
        (status = 401, description = "Missing tenant", body = ErrorResponse)
    ),
    tag = "graphs"
)]
pub async fn list_graphs(
    State(state): State<Arc<ApiState>>,
    tenant: TenantId,
    Query(params): Query<LimitParams>,
) -> Json<ApiResponse<Vec<GraphSummary>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    // The graph table is written by the graph service and may not exist yet
    let graphs = match state.store.graphs.list_graphs(limit).await {
        Ok(graphs) => graphs,
        Err(e) => {
            tracing::warn!("Listing graphs for tenant {} failed: {}", tenant, e);
            Vec::new()
        }
    };

    Json(ApiResponse::success(graphs))
}

/// Get the stored data of one graph
#[utoipa::path(
    get,
    path = "/api/v1/graphs/{id}",
    params(("id" = String, Path,), ("X-Tenant-Id" = String, Header,)),
    responses(
        (status = 200, description = "Graph data"),
        (status = 404, description = "Graph not found", body = ErrorResponse)
    ),
    tag = "graphs"
)]
pub async fn get_graph(
    State(state): State<Arc<ApiState>>,
    _tenant: TenantId,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let graph = state
        .store
        .graphs
        .get_graph(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Graph not found".into()))?;

    Ok(Json(ApiResponse::success(graph.data)))
}
