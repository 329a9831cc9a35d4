//! API configuration
//!
//! Every setting can come from a CLI flag or an `ATLAS_API_*` environment
//! variable. Flags take precedence over the environment.

use clap::{ArgAction, Parser};
use std::time::Duration;

use crate::error::ApiError;

/// Secret used to sign tokens when none is configured outside production.
const DEV_JWT_SECRET: &str = "atlas-dev-secret-change-in-production";

/// Origin allowed when `cors_allowed_origins` is empty.
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Configuration for atlas-api
#[derive(Debug, Clone, Parser)]
#[command(name = "atlas-api", version, about = "PipelineAtlas control-plane API")]
pub struct ApiConfig {
    /// Deployment environment (production, staging, development, test)
    #[arg(long, env = "ATLAS_API_ENVIRONMENT", default_value = "production")]
    pub environment: String,

    /// Bind host
    #[arg(long, env = "ATLAS_API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port
    #[arg(long, env = "ATLAS_API_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "ATLAS_API_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "ATLAS_API_DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "ATLAS_API_DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "ATLAS_API_DB_NAME", default_value = "atlas_db")]
    pub db_name: String,

    #[arg(long, env = "ATLAS_API_DB_USER", default_value = "postgres")]
    pub db_user: String,

    #[arg(long, env = "ATLAS_API_DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "ATLAS_API_DB_POOL_MIN_SIZE", default_value_t = 4)]
    pub db_pool_min_size: u32,

    #[arg(long, env = "ATLAS_API_DB_POOL_MAX_SIZE", default_value_t = 20)]
    pub db_pool_max_size: u32,

    /// Run against the in-memory store instead of PostgreSQL
    #[arg(long, env = "ATLAS_API_IN_MEMORY")]
    pub in_memory: bool,

    /// Comma-separated list of allowed CORS origins
    #[arg(long, env = "ATLAS_API_CORS_ALLOWED_ORIGINS", default_value = "")]
    pub cors_allowed_origins: String,

    #[arg(
        long,
        env = "ATLAS_API_RATE_LIMIT_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub rate_limit_enabled: bool,

    /// Per-client limit across all routes, e.g. `200/minute`
    #[arg(long, env = "ATLAS_API_RATE_LIMIT_DEFAULT", default_value = "200/minute")]
    pub rate_limit_default: String,

    /// Per-client limit on webhook POST routes
    #[arg(long, env = "ATLAS_API_RATE_LIMIT_WEBHOOKS", default_value = "500/hour")]
    pub rate_limit_webhooks: String,

    #[arg(long, env = "ATLAS_API_JWT_SECRET", default_value = "", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "ATLAS_API_JWT_EXPIRY_SECS", default_value_t = 3600)]
    pub jwt_expiry_secs: i64,

    /// Shared secret for `X-Hub-Signature-256` verification
    #[arg(long, env = "ATLAS_API_GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    pub github_webhook_secret: Option<String>,

    /// Expected `X-Gitlab-Token` value
    #[arg(long, env = "ATLAS_API_GITLAB_WEBHOOK_TOKEN", hide_env_values = true)]
    pub gitlab_webhook_token: Option<String>,

    /// Signing secret for `Stripe-Signature` verification
    #[arg(long, env = "ATLAS_API_STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    pub stripe_webhook_secret: Option<String>,

    /// Capacity of the usage event queue
    #[arg(long, env = "ATLAS_API_USAGE_QUEUE_SIZE", default_value_t = 1024)]
    pub usage_queue_size: usize,
}

impl ApiConfig {
    /// Configuration for local development and tests: in-memory store,
    /// no rate limiting, development JWT secret.
    pub fn development() -> Self {
        Self {
            environment: "development".into(),
            host: "127.0.0.1".into(),
            port: 8000,
            log_level: "debug".into(),
            db_host: "localhost".into(),
            db_port: 5432,
            db_name: "atlas_db".into(),
            db_user: "postgres".into(),
            db_password: String::new(),
            db_pool_min_size: 1,
            db_pool_max_size: 5,
            in_memory: true,
            cors_allowed_origins: String::new(),
            rate_limit_enabled: false,
            rate_limit_default: "200/minute".into(),
            rate_limit_webhooks: "500/hour".into(),
            jwt_secret: String::new(),
            jwt_expiry_secs: 3600,
            github_webhook_secret: None,
            gitlab_webhook_token: None,
            stripe_webhook_secret: None,
            usage_queue_size: 1024,
        }
    }

    /// PostgreSQL connection string
    pub fn database_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment.as_str(), "development" | "test")
    }

    /// Secret used for signing JWTs.
    ///
    /// Falls back to a fixed development secret only outside production.
    pub fn jwt_secret(&self) -> Result<String, ApiError> {
        if !self.jwt_secret.is_empty() {
            return Ok(self.jwt_secret.clone());
        }
        if self.is_development() {
            tracing::warn!("ATLAS_API_JWT_SECRET not set, using development secret");
            return Ok(DEV_JWT_SECRET.to_string());
        }
        Err(ApiError::Config(
            "ATLAS_API_JWT_SECRET must be set outside development".into(),
        ))
    }

    /// Allowed CORS origins
    pub fn cors_origins(&self) -> Vec<String> {
        let origins: Vec<String> = self
            .cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        if origins.is_empty() {
            vec![DEFAULT_CORS_ORIGIN.to_string()]
        } else {
            origins
        }
    }

    pub fn default_rate(&self) -> Result<RateSpec, ApiError> {
        RateSpec::parse(&self.rate_limit_default)
    }

    pub fn webhook_rate(&self) -> Result<RateSpec, ApiError> {
        RateSpec::parse(&self.rate_limit_webhooks)
    }
}

/// A rate expressed as `requests/period`, e.g. `200/minute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub requests: u32,
    pub period: Duration,
}

impl RateSpec {
    pub fn parse(spec: &str) -> Result<Self, ApiError> {
        let invalid = || ApiError::Config(format!("invalid rate limit '{spec}'"));

        let (count, unit) = spec.trim().split_once('/').ok_or_else(invalid)?;
        let requests: u32 = count.trim().parse().map_err(|_| invalid())?;
        if requests == 0 {
            return Err(invalid());
        }

        let secs = match unit.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "s" => 1,
            "minute" | "minutes" | "m" => 60,
            "hour" | "hours" | "h" => 3600,
            "day" | "days" | "d" => 86_400,
            _ => return Err(invalid()),
        };

        Ok(Self {
            requests,
            period: Duration::from_secs(secs),
        })
    }

    /// Tokens added per second
    pub fn refill_per_sec(&self) -> f64 {
        self.requests as f64 / self.period.as_secs_f64()
    }
}
