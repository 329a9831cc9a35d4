//! PipelineAtlas control-plane API
//!
//! REST service in front of the PipelineAtlas scanners: serves pipeline
//! graphs and reports, runs the refactor proposal review workflow, tracks
//! score trends and tenant usage, and receives CI and billing webhooks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          atlas-api (axum)                            │
//! │                                                                      │
//! │  Trace ─ CORS ─ Rate limit ─┬─ /health                               │
//! │                             ├─ /docs  (OpenAPI)                      │
//! │                             └─ /api/v1/...  (auth, tenant, RBAC)     │
//! │                                     │                                │
//! │           ┌─────────────────────────┼──────────────────────┐         │
//! │           ▼                         ▼                      ▼         │
//! │   ┌──────────────┐        ┌──────────────────┐   ┌──────────────────┐│
//! │   │    Store     │        │  Usage worker    │   │  Notification    ││
//! │   │ Postgres/mem │◄───────│  (mpsc queue)    │   │  dispatcher      ││
//! │   └──────────────┘        └──────────────────┘   └──────────────────┘│
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod signing;
pub mod store;
pub mod usage;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{middleware::from_fn_with_state, routing::get, Router};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use models::*;

use middleware::auth::{ApiKeyRegistry, TokenService};
use middleware::rate_limit::{rate_limit, RateLimiter};
use notifications::NotificationDispatcher;
use store::Store;

/// API state
pub struct ApiState {
    pub config: ApiConfig,
    pub tokens: TokenService,
    pub api_keys: ApiKeyRegistry,
    pub store: Store,
    pub default_limiter: RateLimiter,
    pub webhook_limiter: RateLimiter,
    /// Producer side of the usage worker queue
    pub usage_tx: mpsc::Sender<UsageMessage>,
    pub notifications: Arc<NotificationDispatcher>,
}

impl ApiState {
    pub fn new(
        config: ApiConfig,
        store: Store,
        usage_tx: mpsc::Sender<UsageMessage>,
        notifications: Arc<NotificationDispatcher>,
    ) -> ApiResult<Self> {
        let tokens = TokenService::new(&config.jwt_secret()?, config.jwt_expiry_secs);
        let default_limiter = RateLimiter::new(config.default_rate()?, config.rate_limit_enabled);
        let webhook_limiter = RateLimiter::new(config.webhook_rate()?, config.rate_limit_enabled);

        Ok(Self {
            config,
            tokens,
            api_keys: ApiKeyRegistry::new(),
            store,
            default_limiter,
            webhook_limiter,
            usage_tx,
            notifications,
        })
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PipelineAtlas API",
        description = "Control-plane API for PipelineAtlas. All /api/v1 responses use the {success, data, error} envelope."
    ),
    paths(
        routes::health::health_check,
        routes::graphs::list_graphs,
        routes::graphs::get_graph,
        routes::reports::get_report,
        routes::proposals::create_proposal,
        routes::proposals::list_proposals,
        routes::proposals::get_proposal,
        routes::proposals::update_proposal,
        routes::trends::create_snapshot,
        routes::trends::get_trends,
        routes::webhooks::github_webhook,
        routes::webhooks::gitlab_webhook,
        routes::webhooks::list_events,
        routes::billing::create_checkout_session,
        routes::billing::stripe_webhook,
        routes::billing::billing_status,
        routes::admin::cross_org_stats,
        routes::usage::publish_usage,
        routes::notifications::list_rules,
        routes::notifications::create_rule,
        routes::notifications::delete_rule,
        routes::api_keys::list_api_keys,
        routes::api_keys::create_api_key,
        routes::api_keys::revoke_api_key,
        routes::auth::issue_token,
    ),
    components(
        schemas(
            ErrorResponse,
            routes::health::HealthResponse,
            GraphSummary, Report, ReportScores, Finding, HealthRating,
            Proposal, ProposalCreate, ProposalUpdate, ProposalStatus, ProposalComment,
            Snapshot, SnapshotCreate, TrendReport, MetricTrend, TrendDirection,
            CiEvent, Platform, WebhookAccepted,
            PlanTier, BillingStatus, CheckoutSessionRequest, CheckoutSessionResponse,
            routes::billing::WebhookAck,
            TenantStats, routes::admin::CrossOrgStats,
            UsageMessage,
            notifications::NotificationRule, notifications::NotificationRuleCreate,
            notifications::AlertThresholds,
            ApiKey, ApiKeyCreate, ApiKeyCreated, middleware::auth::Role,
            TokenRequest, TokenResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "graphs", description = "Stored pipeline graphs"),
        (name = "reports", description = "Pipeline reports"),
        (name = "proposals", description = "Refactor proposal review"),
        (name = "trends", description = "Score snapshots and trends"),
        (name = "webhooks", description = "Inbound CI webhooks"),
        (name = "billing", description = "Plans, checkout and usage"),
        (name = "admin", description = "Cross-tenant statistics"),
        (name = "usage", description = "Usage event ingestion"),
        (name = "notifications", description = "Score alert rules"),
        (name = "api-keys", description = "API key management"),
        (name = "auth", description = "Token issuing")
    )
)]
pub struct ApiDoc;

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::tenant::TENANT_HEADER),
        ])
        .allow_credentials(true)
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1", api_routes())
        .layer(
            // Trace outermost: Cors needs a Default response body.
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config))
                .layer(from_fn_with_state(state.clone(), rate_limit)),
        )
        .with_state(state)
}

fn api_routes() -> Router<Arc<ApiState>> {
    Router::new()
        // Tenant-scoped resources
        .nest("/graphs", routes::graphs::router())
        .nest("/reports", routes::reports::router())
        .nest("/billing", routes::billing::router())
        // Review workflow
        .nest("/proposals", routes::proposals::router())
        .merge(routes::trends::router())
        .nest("/notifications", routes::notifications::router())
        // Ingestion
        .nest("/webhooks", routes::webhooks::router())
        .nest("/usage", routes::usage::router())
        // Administration
        .nest("/admin", routes::admin::router())
        .nest("/api-keys", routes::api_keys::router())
        .nest("/auth", routes::auth::router())
}
