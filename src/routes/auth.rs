//! Token issuing endpoint

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::Json;
use crate::middleware::auth::{require_role, AuthUser, CurrentUser, Role};
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/token", post(issue_token))
}

/// Mint a bearer token for a dashboard user
#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn issue_token(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<ApiResponse<TokenResponse>>> {
    require_role(&user, Role::Admin)?;

    if request.user_id.trim().is_empty() || request.username.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id and username are required".into()));
    }

    let mut subject = AuthUser::new(request.user_id, request.username, request.role);
    subject.email = request.email;

    let access_token = state.tokens.issue(&subject)?;
    tracing::info!("Token issued for {} ({}) by {}", subject.username, subject.role, user.username);

    Ok(Json(ApiResponse::success(TokenResponse {
        access_token,
        token_type: "bearer".into(),
        expires_in: state.tokens.expiry_secs(),
    })))
}
