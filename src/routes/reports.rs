//! Report endpoints
//!
//! A report is a view over a stored graph: scores come from the most
//! recent snapshot recorded for the graph, findings from the graph data.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::tenant::TenantId;
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/:graph_id", get(get_report))
}

/// Rate a pipeline from its risk scores.
///
/// Risk is the mean of complexity and fragility: below 50 is good, below 75
/// fair, anything else poor.
pub fn overall_health(complexity: f64, fragility: f64) -> HealthRating {
    let risk = (complexity + fragility) / 2.0;
    if risk < 50.0 {
        HealthRating::Good
    } else if risk < 75.0 {
        HealthRating::Fair
    } else {
        HealthRating::Poor
    }
}

/// Scores of the latest snapshot, or zeroes rated `unknown`
pub fn scores_from(snapshot: Option<&Snapshot>) -> ReportScores {
    match snapshot {
        Some(s) => ReportScores {
            complexity_score: s.complexity_score,
            fragility_score: s.fragility_score,
            maturity_score: s.maturity_score,
            overall_health: overall_health(s.complexity_score, s.fragility_score),
        },
        None => ReportScores {
            complexity_score: 0.0,
            fragility_score: 0.0,
            maturity_score: 0.0,
            overall_health: HealthRating::Unknown,
        },
    }
}

/// Findings stored under `findings` in the graph data; malformed entries are skipped
pub fn findings_from(data: &serde_json::Value) -> Vec<Finding> {
    data.get("findings")
        .and_then(|f| f.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Get the report for a graph
#[utoipa::path(
    get,
    path = "/api/v1/reports/{graph_id}",
    params(("graph_id" = String, Path,), ("X-Tenant-Id" = String, Header,)),
    responses(
        (status = 200, description = "Report", body = Report),
        (status = 404, description = "Graph not found", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn get_report(
    State(state): State<Arc<ApiState>>,
    _tenant: TenantId,
    Path(graph_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Report>>> {
    let graph = state
        .store
        .graphs
        .get_graph(&graph_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Graph not found".into()))?;

    let latest = state.store.snapshots.latest_for_graph_id(&graph_id).await?;

    Ok(Json(ApiResponse::success(Report {
        scores: scores_from(latest.as_ref()),
        findings: findings_from(&graph.data),
        graph_id: graph.id,
        name: graph.name,
        platform: graph.platform,
    })))
}
