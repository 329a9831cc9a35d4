//! Billing endpoints

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult};
use crate::extract::Json;
use crate::middleware::auth::CurrentUser;
use crate::middleware::permissions::Permission;
use crate::middleware::tenant::TenantId;
use crate::store::StoreResult;
use crate::{models::*, signing, ApiState};

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/webhook", post(stripe_webhook))
        .route("/status", get(billing_status))
}

/// Stripe webhook acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
}

/// Subscription change carried by a Stripe event
#[derive(Debug, PartialEq, Eq)]
pub enum SubscriptionChange {
    Updated { tenant_id: String, plan: PlanTier },
    Deleted { tenant_id: String },
    Ignored,
}

/// Interpret a Stripe event body
///
/// The tenant and plan travel in `data.object.metadata` as `tenant_id` and
/// `plan_tier`.
pub fn parse_stripe_event(event: &Value) -> Result<SubscriptionChange, String> {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or("event has no type")?;
    let metadata = event.pointer("/data/object/metadata");
    let tenant_id = metadata
        .and_then(|m| m.get("tenant_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match event_type {
        "customer.subscription.updated" => {
            let tenant_id = tenant_id.ok_or("subscription has no tenant_id")?;
            let plan = metadata
                .and_then(|m| m.get("plan_tier"))
                .and_then(Value::as_str)
                .ok_or("subscription has no plan_tier")?
                .parse::<PlanTier>()?;
            Ok(SubscriptionChange::Updated { tenant_id, plan })
        }
        "customer.subscription.deleted" => {
            let tenant_id = tenant_id.ok_or("subscription has no tenant_id")?;
            Ok(SubscriptionChange::Deleted { tenant_id })
        }
        _ => Ok(SubscriptionChange::Ignored),
    }
}

async fn apply_change(state: &ApiState, change: SubscriptionChange) -> StoreResult<()> {
    match change {
        SubscriptionChange::Updated { tenant_id, plan } => {
            state.store.tenants.set_plan(&tenant_id, plan).await?;
            tracing::info!("Tenant {} moved to plan {}", tenant_id, plan.as_str());
        }
        SubscriptionChange::Deleted { tenant_id } => {
            state.store.tenants.set_plan(&tenant_id, PlanTier::Free).await?;
            tracing::info!("Tenant {} subscription cancelled, back on free", tenant_id);
        }
        SubscriptionChange::Ignored => {}
    }
    Ok(())
}

/// Create a checkout session for the caller's tenant
#[utoipa::path(
    post,
    path = "/api/v1/billing/create-checkout-session",
    params(("X-Tenant-Id" = String, Header,)),
    request_body = CheckoutSessionRequest,
    responses((status = 200, description = "Checkout URL", body = CheckoutSessionResponse)),
    security(("bearer" = [])),
    tag = "billing"
)]
pub async fn create_checkout_session(
    tenant: TenantId,
    user: CurrentUser,
    Json(request): Json<CheckoutSessionRequest>,
) -> ApiResult<Json<ApiResponse<CheckoutSessionResponse>>> {
    user.require(Permission::BillingManage)?;

    tracing::info!("Creating checkout session for tenant {} with plan {}", tenant, request.plan_id);
    Ok(Json(ApiResponse::success(CheckoutSessionResponse {
        url: format!("https://checkout.stripe.com/pay/cs_test_mock_{}_{}", tenant, request.plan_id),
    })))
}

/// Handle Stripe subscription webhooks
#[utoipa::path(
    post,
    path = "/api/v1/billing/webhook",
    params(("Stripe-Signature" = Option<String>, Header, description = "Required when a secret is configured")),
    responses(
        (status = 200, description = "Event processed", body = WebhookAck),
        (status = 400, description = "Webhook processing failed", body = ErrorResponse)
    ),
    tag = "billing"
)]
pub async fn stripe_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<WebhookAck>>> {
    if let Some(secret) = state.config.stripe_webhook_secret.as_deref() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !signing::verify_stripe(secret, &body, signature, chrono::Utc::now().timestamp()) {
            tracing::warn!("Rejected Stripe webhook with invalid signature");
            return Err(ApiError::BadRequest("Webhook processing failed".into()));
        }
    }

    let change = serde_json::from_slice::<Value>(&body)
        .map_err(|e| e.to_string())
        .and_then(|event| parse_stripe_event(&event))
        .map_err(|e| {
            tracing::error!("Error processing webhook: {}", e);
            ApiError::BadRequest("Webhook processing failed".into())
        })?;

    apply_change(&state, change).await?;

    Ok(Json(ApiResponse::success(WebhookAck { status: "success".into() })))
}

/// Current plan and usage of the caller's tenant
#[utoipa::path(
    get,
    path = "/api/v1/billing/status",
    params(("X-Tenant-Id" = String, Header,)),
    responses((status = 200, description = "Billing status", body = BillingStatus)),
    security(("bearer" = [])),
    tag = "billing"
)]
pub async fn billing_status(
    State(state): State<Arc<ApiState>>,
    tenant: TenantId,
    user: CurrentUser,
) -> ApiResult<Json<ApiResponse<BillingStatus>>> {
    user.require(Permission::BillingRead)?;

    let status = state
        .store
        .tenants
        .billing_status(tenant.as_str())
        .await?
        .unwrap_or_default();

    Ok(Json(ApiResponse::success(status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_updated() {
        let event = json!({
            "type": "customer.subscription.updated",
            "data": {"object": {"metadata": {"tenant_id": "acme", "plan_tier": "pro"}}}
        });
        assert_eq!(
            parse_stripe_event(&event).unwrap(),
            SubscriptionChange::Updated { tenant_id: "acme".into(), plan: PlanTier::Pro }
        );
    }

    #[test]
    fn test_subscription_deleted() {
        let event = json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {"metadata": {"tenant_id": "acme"}}}
        });
        assert_eq!(
            parse_stripe_event(&event).unwrap(),
            SubscriptionChange::Deleted { tenant_id: "acme".into() }
        );
    }

    #[test]
    fn test_other_events_ignored() {
        let event = json!({"type": "invoice.paid"});
        assert_eq!(parse_stripe_event(&event).unwrap(), SubscriptionChange::Ignored);
    }

    #[test]
    fn test_malformed_events_rejected() {
        assert!(parse_stripe_event(&json!({})).is_err());
        assert!(parse_stripe_event(&json!({"type": "customer.subscription.updated"})).is_err());
        let bad_plan = json!({
            "type": "customer.subscription.updated",
            "data": {"object": {"metadata": {"tenant_id": "acme", "plan_tier": "platinum"}}}
        });
        assert!(parse_stripe_event(&bad_plan).is_err());
    }
}
