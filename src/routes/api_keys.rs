//! API Key management endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::Router;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::auth::{require_role, CurrentUser};
use crate::middleware::permissions::{parse_scopes, Permission};
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_api_keys).post(create_api_key))
        .route("/:id", delete(revoke_api_key))
}

/// List API keys (without secrets)
#[utoipa::path(
    get,
    path = "/api/v1/api-keys",
    responses((status = 200, description = "API keys", body = [ApiKey])),
    security(("bearer" = [])),
    tag = "api-keys"
)]
pub async fn list_api_keys(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
) -> ApiResult<Json<ApiResponse<Vec<ApiKey>>>> {
    user.require(Permission::ApiKeysManage)?;
    Ok(Json(ApiResponse::success(state.api_keys.list())))
}

/// Create an API key; the full key is only returned here
#[utoipa::path(
    post,
    path = "/api/v1/api-keys",
    request_body = ApiKeyCreate,
    responses(
        (status = 201, description = "Key created", body = ApiKeyCreated),
        (status = 400, description = "Unknown scope", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "api-keys"
)]
pub async fn create_api_key(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(input): Json<ApiKeyCreate>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ApiKeyCreated>>)> {
    user.require(Permission::ApiKeysManage)?;

    // Keys cannot outrank their creator
    require_role(&user, input.role)?;
    if let Some(unknown) = input
        .scopes
        .iter()
        .find(|s| parse_scopes(std::slice::from_ref(*s)).is_empty())
    {
        return Err(ApiError::BadRequest(format!("unknown scope: {unknown}")));
    }

    let created = state.api_keys.create(&input.name, input.role, input.scopes);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Revoke an API key
#[utoipa::path(
    delete,
    path = "/api/v1/api-keys/{id}",
    params(("id" = String, Path,)),
    responses(
        (status = 200, description = "Key revoked"),
        (status = 404, description = "Key not found", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "api-keys"
)]
pub async fn revoke_api_key(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    user.require(Permission::ApiKeysManage)?;

    let id = super::resource_id(&id, "API key not found")?;
    if !state.api_keys.revoke(id) {
        return Err(ApiError::NotFound("API key not found".into()));
    }
    tracing::info!("API key {} revoked by {}", id, user.username);
    Ok(Json(ApiResponse::success(())))
}
