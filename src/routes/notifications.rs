//! Notification rule endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::Router;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::notifications::{NotificationRule, NotificationRuleCreate};
use crate::{models::*, ApiState};

const RULE_NOT_FOUND: &str = "Notification rule not found";

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route("/:id", delete(delete_rule))
}

/// List notification rules
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    responses((status = 200, description = "Rules", body = [NotificationRule])),
    security(("bearer" = [])),
    tag = "notifications"
)]
pub async fn list_rules(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
) -> ApiResult<Json<ApiResponse<Vec<NotificationRule>>>> {
    user.require(Permission::NotificationsRead)?;
    Ok(Json(ApiResponse::success(state.notifications.list_rules())))
}

/// Create a notification rule
#[utoipa::path(
    post,
    path = "/api/v1/notifications",
    request_body = NotificationRuleCreate,
    responses(
        (status = 201, description = "Rule created", body = NotificationRule),
        (status = 400, description = "Invalid target", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "notifications"
)]
pub async fn create_rule(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(input): Json<NotificationRuleCreate>,
) -> ApiResult<(StatusCode, Json<ApiResponse<NotificationRule>>)> {
    user.require(Permission::NotificationsWrite)?;

    if !(input.target.starts_with("http://") || input.target.starts_with("https://")) {
        return Err(ApiError::BadRequest("target must be an http(s) URL".into()));
    }
    if input.graph_name.trim().is_empty() {
        return Err(ApiError::BadRequest("graph_name is required".into()));
    }

    let rule = state.notifications.add_rule(input);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(rule))))
}

/// Delete a notification rule
#[utoipa::path(
    delete,
    path = "/api/v1/notifications/{id}",
    params(("id" = String, Path,)),
    responses(
        (status = 200, description = "Rule deleted"),
        (status = 404, description = "Rule not found", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "notifications"
)]
pub async fn delete_rule(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    user.require(Permission::NotificationsWrite)?;

    let id = super::resource_id(&id, RULE_NOT_FOUND)?;
    if !state.notifications.remove_rule(id) {
        return Err(ApiError::NotFound(RULE_NOT_FOUND.into()));
    }
    Ok(Json(ApiResponse::success(())))
}
