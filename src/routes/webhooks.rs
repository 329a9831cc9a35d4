//! Inbound CI webhook endpoints
//!
//! GitHub and GitLab push/merge events are recorded and charged as scan
//! requests to the tenant named by `X-Tenant-Id`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::LimitParams;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Query};
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::middleware::tenant::TenantId;
use crate::usage::{DEFAULT_TENANT, SCAN_REQUESTS_STREAM};
use crate::{models::*, signing, ApiState};

const DEFAULT_EVENT_LIMIT: usize = 20;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/github", post(github_webhook))
        .route("/gitlab", post(gitlab_webhook))
        .route("/events", get(list_events))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> &'a str {
    body.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn parse_body(body: &Bytes) -> ApiResult<Value> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Invalid JSON payload".into()))
}

/// Build a GitHub event from its payload and `X-GitHub-Event` header
pub fn github_event(event_type: &str, body: &Value) -> CiEvent {
    CiEvent {
        id: Uuid::new_v4(),
        platform: Platform::Github,
        event_type: event_type.to_string(),
        repository: str_at(body, "/repository/full_name").to_string(),
        git_ref: str_at(body, "/ref").to_string(),
        sender: str_at(body, "/sender/login").to_string(),
        action: Some(str_at(body, "/action").to_string()),
        received_at: Utc::now(),
    }
}

/// Build a GitLab event from its payload
pub fn gitlab_event(body: &Value) -> CiEvent {
    let kind = body.get("object_kind").and_then(Value::as_str).unwrap_or("unknown");
    CiEvent {
        id: Uuid::new_v4(),
        platform: Platform::Gitlab,
        event_type: kind.to_string(),
        repository: str_at(body, "/project/path_with_namespace").to_string(),
        git_ref: str_at(body, "/ref").to_string(),
        sender: str_at(body, "/user_name").to_string(),
        action: None,
        received_at: Utc::now(),
    }
}

/// Record the event and queue a scan request for the caller's tenant
async fn accept(
    state: &ApiState,
    headers: &HeaderMap,
    event: CiEvent,
) -> ApiResult<(StatusCode, Json<ApiResponse<WebhookAccepted>>)> {
    state.store.webhook_events.insert(&event).await?;

    let tenant = TenantId::from_headers_opt(headers)
        .map(|t| t.0)
        .unwrap_or_else(|| DEFAULT_TENANT.to_string());
    let message = UsageMessage {
        stream: SCAN_REQUESTS_STREAM.to_string(),
        payload: json!({
            "tenant_id": tenant,
            "repository": event.repository,
            "ref": event.git_ref,
            "event_id": event.id,
        }),
    };
    if let Err(e) = state.usage_tx.try_send(message) {
        tracing::warn!("Scan request for event {} not queued: {}", event.id, e);
    }

    tracing::info!(
        "{} {} event received for {} ({})",
        event.platform, event.event_type, event.repository, event.id
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(WebhookAccepted {
            status: "accepted".into(),
            message: format!(
                "{} {} event received for {}",
                event.platform, event.event_type, event.repository
            ),
            event_id: Some(event.id),
        })),
    ))
}

/// Handle GitHub push/PR webhook events
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/github",
    params(
        ("X-GitHub-Event" = Option<String>, Header,),
        ("X-Hub-Signature-256" = Option<String>, Header, description = "Required when a secret is configured")
    ),
    responses(
        (status = 202, description = "Event accepted", body = WebhookAccepted),
        (status = 401, description = "Bad signature", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn github_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ApiResponse<WebhookAccepted>>)> {
    if let Some(secret) = state.config.github_webhook_secret.as_deref() {
        let signature = header_str(&headers, "x-hub-signature-256").unwrap_or("");
        if !signing::verify_github(secret, &body, signature) {
            tracing::warn!("Rejected GitHub webhook with invalid signature");
            return Err(ApiError::Unauthorized("invalid webhook signature".into()));
        }
    }

    let payload = parse_body(&body)?;
    let event_type = header_str(&headers, "x-github-event").unwrap_or("unknown");
    accept(&state, &headers, github_event(event_type, &payload)).await
}

/// Handle GitLab push webhook events
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/gitlab",
    params(("X-Gitlab-Token" = Option<String>, Header, description = "Required when a token is configured")),
    responses(
        (status = 202, description = "Event accepted", body = WebhookAccepted),
        (status = 401, description = "Bad token", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn gitlab_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ApiResponse<WebhookAccepted>>)> {
    if let Some(expected) = state.config.gitlab_webhook_token.as_deref() {
        let provided = header_str(&headers, "x-gitlab-token").unwrap_or_default();
        if !signing::tokens_match(expected, provided) {
            tracing::warn!("Rejected GitLab webhook with invalid token");
            return Err(ApiError::Unauthorized("invalid webhook token".into()));
        }
    }

    let payload = parse_body(&body)?;
    accept(&state, &headers, gitlab_event(&payload)).await
}

/// List recent webhook events
#[utoipa::path(
    get,
    path = "/api/v1/webhooks/events",
    params(("limit" = Option<usize>, Query, description = "Events returned (default 20)")),
    responses((status = 200, description = "Recent events, oldest first", body = [CiEvent])),
    security(("bearer" = [])),
    tag = "webhooks"
)]
pub async fn list_events(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ApiResponse<Vec<CiEvent>>>> {
    user.require(Permission::WebhooksRead)?;

    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let events = state.store.webhook_events.recent(limit).await?;
    Ok(Json(ApiResponse::success(events)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_event_fields() {
        let body = json!({
            "ref": "refs/heads/main",
            "action": "opened",
            "repository": {"full_name": "acme/backend"},
            "sender": {"login": "octocat"}
        });
        let event = github_event("pull_request", &body);
        assert_eq!(event.platform, Platform::Github);
        assert_eq!(event.event_type, "pull_request");
        assert_eq!(event.repository, "acme/backend");
        assert_eq!(event.git_ref, "refs/heads/main");
        assert_eq!(event.sender, "octocat");
        assert_eq!(event.action.as_deref(), Some("opened"));
    }

    #[test]
    fn test_gitlab_event_defaults() {
        let event = gitlab_event(&json!({}));
        assert_eq!(event.event_type, "unknown");
        assert_eq!(event.repository, "");
        assert!(event.action.is_none());

        let event = gitlab_event(&json!({
            "object_kind": "push",
            "project": {"path_with_namespace": "acme/frontend"},
            "user_name": "jane"
        }));
        assert_eq!(event.event_type, "push");
        assert_eq!(event.repository, "acme/frontend");
        assert_eq!(event.sender, "jane");
    }
}
