//! Refactor proposal endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::{models::*, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_proposals).post(create_proposal))
        .route("/:id", get(get_proposal).patch(update_proposal))
}

const PROPOSAL_NOT_FOUND: &str = "Proposal not found";

#[derive(Debug, Deserialize)]
pub struct ProposalFilter {
    pub status: Option<String>,
}

/// Apply a status change and/or review comment to a proposal
pub fn apply_update(proposal: &mut Proposal, update: &ProposalUpdate) -> ApiResult<()> {
    if let Some(requested) = update.status.as_deref().filter(|s| !s.is_empty()) {
        let next = requested
            .parse::<ProposalStatus>()
            .ok()
            .filter(|next| proposal.status.can_transition_to(*next))
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Cannot transition from '{}' to '{}'",
                    proposal.status.as_str(),
                    requested
                ))
            })?;
        proposal.status = next;
    }

    if !update.comment.is_empty() {
        let author = if update.reviewer.is_empty() { "system" } else { update.reviewer.as_str() };
        proposal.comments.push(ProposalComment {
            author: author.to_string(),
            text: update.comment.clone(),
            created_at: Utc::now(),
        });
    }

    proposal.updated_at = Utc::now();
    Ok(())
}

/// Create a refactor proposal
#[utoipa::path(
    post,
    path = "/api/v1/proposals",
    request_body = ProposalCreate,
    responses(
        (status = 201, description = "Proposal created in draft", body = Proposal),
        (status = 403, description = "Missing proposals:write", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "proposals"
)]
pub async fn create_proposal(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Json(input): Json<ProposalCreate>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Proposal>>)> {
    user.require(Permission::ProposalsWrite)?;

    let proposal = Proposal::new(input);
    state.store.proposals.insert(&proposal).await?;
    tracing::info!("Proposal {} created by {} for graph {}", proposal.id, user.username, proposal.graph_id);

    Ok((StatusCode::CREATED, Json(ApiResponse::success(proposal))))
}

/// List proposals, optionally filtered by status
#[utoipa::path(
    get,
    path = "/api/v1/proposals",
    params(("status" = Option<String>, Query, description = "draft, pending, approved or rejected")),
    responses((status = 200, description = "Proposals, oldest first", body = [Proposal])),
    security(("bearer" = [])),
    tag = "proposals"
)]
pub async fn list_proposals(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Query(filter): Query<ProposalFilter>,
) -> ApiResult<Json<ApiResponse<Vec<Proposal>>>> {
    user.require(Permission::ProposalsRead)?;

    let proposals = match filter.status.as_deref().filter(|s| !s.is_empty()) {
        None => state.store.proposals.list(None).await?,
        Some(status) => match status.parse::<ProposalStatus>() {
            Ok(status) => state.store.proposals.list(Some(status)).await?,
            // No proposal can carry an unknown status
            Err(_) => Vec::new(),
        },
    };

    Ok(Json(ApiResponse::success(proposals)))
}

/// Get a proposal
#[utoipa::path(
    get,
    path = "/api/v1/proposals/{id}",
    params(("id" = String, Path,)),
    responses(
        (status = 200, description = "Proposal", body = Proposal),
        (status = 404, description = "Proposal not found", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "proposals"
)]
pub async fn get_proposal(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Proposal>>> {
    user.require(Permission::ProposalsRead)?;

    let id = super::resource_id(&id, PROPOSAL_NOT_FOUND)?;
    let proposal = state
        .store
        .proposals
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(PROPOSAL_NOT_FOUND.into()))?;

    Ok(Json(ApiResponse::success(proposal)))
}

/// Move a proposal through review and/or add a comment
#[utoipa::path(
    patch,
    path = "/api/v1/proposals/{id}",
    params(("id" = String, Path,)),
    request_body = ProposalUpdate,
    responses(
        (status = 200, description = "Updated proposal", body = Proposal),
        (status = 400, description = "Invalid transition", body = ErrorResponse),
        (status = 404, description = "Proposal not found", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "proposals"
)]
pub async fn update_proposal(
    State(state): State<Arc<ApiState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(update): Json<ProposalUpdate>,
) -> ApiResult<Json<ApiResponse<Proposal>>> {
    user.require(Permission::ProposalsWrite)?;

    let is_decision = update
        .status
        .as_deref()
        .and_then(|s| s.parse::<ProposalStatus>().ok())
        .is_some_and(|s| s.is_review_decision());
    if is_decision {
        user.require(Permission::ProposalsReview)?;
    }

    let id = super::resource_id(&id, PROPOSAL_NOT_FOUND)?;
    let mut proposal = state
        .store
        .proposals
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(PROPOSAL_NOT_FOUND.into()))?;

    apply_update(&mut proposal, &update)?;
    state.store.proposals.update(&proposal).await?;
    tracing::info!("Proposal {} updated by {} (status {})", id, user.username, proposal.status.as_str());

    Ok(Json(ApiResponse::success(proposal)))
}
