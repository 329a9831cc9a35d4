//! Usage event ingestion

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{ApiError, ApiResult};
use crate::extract::Json;
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/events", post(publish_usage))
}

/// Queue a usage event for accounting
#[utoipa::path(
    post,
    path = "/api/v1/usage/events",
    request_body = UsageMessage,
    responses(
        (status = 202, description = "Event queued"),
        (status = 429, description = "Queue full", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "usage"
)]
pub async fn publish_usage(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(message): Json<UsageMessage>,
) -> ApiResult<(StatusCode, Json<ApiResponse<()>>)> {
    user.require(Permission::UsageWrite)?;

    match state.usage_tx.try_send(message) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(())))),
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Usage queue full, rejecting event from {}", user.username);
            Err(ApiError::RateLimited { retry_after_secs: 1 })
        }
        Err(TrySendError::Closed(_)) => Err(ApiError::Internal("usage worker is not running".into())),
    }
}
