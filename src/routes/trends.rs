//! Snapshot and trend endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/snapshots", post(create_snapshot))
        .route("/trends/:graph_name", get(get_trends))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Change of one metric; a rise is good only for maturity
pub fn metric_trend(metric: &str, previous: f64, current: f64, higher_is_better: bool) -> MetricTrend {
    let delta = round1(current - previous);
    let direction = if delta == 0.0 {
        TrendDirection::Stable
    } else if (delta > 0.0) == higher_is_better {
        TrendDirection::Improved
    } else {
        TrendDirection::Regressed
    };

    MetricTrend {
        metric: metric.to_string(),
        previous,
        current,
        delta,
        direction,
    }
}

/// Trends between the two most recent snapshots; empty with fewer than two
pub fn compute_trends(snapshots: &[Snapshot]) -> Vec<MetricTrend> {
    let [.., prev, curr] = snapshots else {
        return Vec::new();
    };

    vec![
        metric_trend("complexity", prev.complexity_score, curr.complexity_score, false),
        metric_trend("fragility", prev.fragility_score, curr.fragility_score, false),
        metric_trend("maturity", prev.maturity_score, curr.maturity_score, true),
    ]
}

/// Store a scan snapshot
#[utoipa::path(
    post,
    path = "/api/v1/snapshots",
    request_body = SnapshotCreate,
    responses((status = 201, description = "Snapshot stored", body = Snapshot)),
    security(("bearer" = [])),
    tag = "trends"
)]
pub async fn create_snapshot(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(input): Json<SnapshotCreate>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Snapshot>>)> {
    user.require(Permission::SnapshotsWrite)?;

    let snapshot = Snapshot::new(input);
    state.store.snapshots.insert(&snapshot).await?;

    let alerts = state.notifications.evaluate(&snapshot);
    tracing::info!(
        "Snapshot {} stored for '{}' ({} alerts queued)",
        snapshot.id, snapshot.graph_name, alerts
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(snapshot))))
}

/// Get trend data for a pipeline
#[utoipa::path(
    get,
    path = "/api/v1/trends/{graph_name}",
    params(("graph_name" = String, Path,)),
    responses(
        (status = 200, description = "Trend report", body = TrendReport),
        (status = 404, description = "No snapshots", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "trends"
)]
pub async fn get_trends(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Path(graph_name): Path<String>,
) -> ApiResult<Json<ApiResponse<TrendReport>>> {
    user.require(Permission::TrendsRead)?;

    let snapshots = state.store.snapshots.list_for_graph(&graph_name).await?;
    if snapshots.is_empty() {
        return Err(ApiError::NotFound(format!("No snapshots for '{graph_name}'")));
    }

    Ok(Json(ApiResponse::success(TrendReport {
        trends: compute_trends(&snapshots),
        total_snapshots: snapshots.len(),
        snapshots,
        graph_name,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(complexity: f64, fragility: f64, maturity: f64) -> Snapshot {
        Snapshot::new(SnapshotCreate {
            graph_name: "backend-ci".into(),
            graph_id: String::new(),
            complexity_score: complexity,
            fragility_score: fragility,
            maturity_score: maturity,
            finding_count: 0,
            node_count: 0,
            edge_count: 0,
        })
    }

    #[test]
    fn test_single_snapshot_has_no_trends() {
        assert!(compute_trends(&[snapshot(10.0, 10.0, 10.0)]).is_empty());
        assert!(compute_trends(&[]).is_empty());
    }

    #[test]
    fn test_directions() {
        let trends = compute_trends(&[
            snapshot(99.0, 0.0, 0.0),
            snapshot(60.0, 40.0, 50.0),
            snapshot(55.04, 45.0, 50.0),
        ]);
        assert_eq!(trends.len(), 3);

        assert_eq!(trends[0].metric, "complexity");
        assert_eq!(trends[0].delta, -5.0);
        assert_eq!(trends[0].direction, TrendDirection::Improved);

        assert_eq!(trends[1].metric, "fragility");
        assert_eq!(trends[1].delta, 5.0);
        assert_eq!(trends[1].direction, TrendDirection::Regressed);

        assert_eq!(trends[2].metric, "maturity");
        assert_eq!(trends[2].direction, TrendDirection::Stable);
    }

    #[test]
    fn test_maturity_rise_improves() {
        let trend = metric_trend("maturity", 40.0, 52.37, true);
        assert_eq!(trend.delta, 12.4);
        assert_eq!(trend.direction, TrendDirection::Improved);

        let trend = metric_trend("maturity", 40.0, 30.0, true);
        assert_eq!(trend.direction, TrendDirection::Regressed);
    }
}
