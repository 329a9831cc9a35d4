//! API Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::middleware::auth::Role;

/// Standard API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

// ============ Tenants & billing ============

/// Subscription plan of a tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown plan tier '{other}'")),
        }
    }
}

/// Tenant
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub plan_tier: PlanTier,
    pub created_at: DateTime<Utc>,
}

/// Accumulated usage counters for a tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageCounters {
    pub scans_count: i64,
    pub token_count: i64,
}

/// Billing status of a tenant
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingStatus {
    pub plan_tier: PlanTier,
    pub scans_count: i64,
    pub token_count: i64,
}

impl Default for BillingStatus {
    fn default() -> Self {
        Self { plan_tier: PlanTier::Free, scans_count: 0, token_count: 0 }
    }
}

/// Per-tenant row in the cross-organization statistics
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TenantStats {
    pub name: String,
    pub plan: PlanTier,
    pub scans: i64,
    pub tokens: i64,
}

/// Checkout session request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionRequest {
    pub plan_id: String,
}

/// Checkout session response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub url: String,
}

// ============ Graphs & reports ============

/// Pipeline graph listing entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

/// Pipeline graph as written by the graph service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphRecord {
    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            platform: self.platform.clone(),
            created_at: self.created_at,
        }
    }
}

/// Overall health rating of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthRating {
    Good,
    Fair,
    Poor,
    Unknown,
}

/// Scores section of a report
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportScores {
    pub complexity_score: f64,
    pub fragility_score: f64,
    pub maturity_score: f64,
    pub overall_health: HealthRating,
}

/// Rule finding attached to a graph
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Finding {
    pub rule_id: String,
    pub severity: String,
    pub message: String,
}

/// Report for a pipeline graph
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub graph_id: String,
    pub name: String,
    pub platform: String,
    pub scores: ReportScores,
    pub findings: Vec<Finding>,
}

// ============ Proposals ============

/// Review status of a refactor proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// draft -> pending -> approved | rejected
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Pending)
                | (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
        )
    }

    /// Final review decision
    pub fn is_review_decision(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown proposal status '{other}'")),
        }
    }
}

/// Review comment on a proposal
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProposalComment {
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Refactor proposal
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Proposal {
    pub id: Uuid,
    pub graph_id: String,
    pub plan_id: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub status: ProposalStatus,
    pub suggestion_count: u32,
    pub diff_preview: String,
    pub comments: Vec<ProposalComment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(input: ProposalCreate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            graph_id: input.graph_id,
            plan_id: input.plan_id,
            title: input.title,
            description: input.description,
            author: input.author,
            status: ProposalStatus::Draft,
            suggestion_count: input.suggestion_count,
            diff_preview: input.diff_preview,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Proposal creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProposalCreate {
    pub graph_id: String,
    pub plan_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub suggestion_count: u32,
    #[serde(default)]
    pub diff_preview: String,
}

/// Proposal update: status transition and/or review comment
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProposalUpdate {
    pub status: Option<String>,
    #[serde(default)]
    pub reviewer: String,
    #[serde(default)]
    pub comment: String,
}

// ============ Snapshots & trends ============

/// Snapshot creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SnapshotCreate {
    pub graph_name: String,
    #[serde(default)]
    pub graph_id: String,
    #[serde(default)]
    pub complexity_score: f64,
    #[serde(default)]
    pub fragility_score: f64,
    #[serde(default)]
    pub maturity_score: f64,
    #[serde(default)]
    pub finding_count: u32,
    #[serde(default)]
    pub node_count: u32,
    #[serde(default)]
    pub edge_count: u32,
}

/// Scores recorded for one scan of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    pub id: Uuid,
    pub graph_name: String,
    pub graph_id: String,
    pub complexity_score: f64,
    pub fragility_score: f64,
    pub maturity_score: f64,
    pub finding_count: u32,
    pub node_count: u32,
    pub edge_count: u32,
    pub scanned_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(input: SnapshotCreate) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph_name: input.graph_name,
            graph_id: input.graph_id,
            complexity_score: input.complexity_score,
            fragility_score: input.fragility_score,
            maturity_score: input.maturity_score,
            finding_count: input.finding_count,
            node_count: input.node_count,
            edge_count: input.edge_count,
            scanned_at: Utc::now(),
        }
    }
}

/// Direction a metric moved between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improved,
    Regressed,
    Stable,
}

/// Change of a single metric between the two latest snapshots
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetricTrend {
    pub metric: String,
    pub previous: f64,
    pub current: f64,
    pub delta: f64,
    pub direction: TrendDirection,
}

/// Trend data for a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrendReport {
    pub graph_name: String,
    pub total_snapshots: usize,
    pub snapshots: Vec<Snapshot>,
    pub trends: Vec<MetricTrend>,
}

// ============ CI webhooks ============

/// CI platform that sent a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Github => write!(f, "GitHub"),
            Self::Gitlab => write!(f, "GitLab"),
        }
    }
}

/// Received CI webhook event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CiEvent {
    pub id: Uuid,
    pub platform: Platform,
    pub event_type: String,
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sender: String,
    pub action: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Webhook acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAccepted {
    pub status: String,
    pub message: String,
    pub event_id: Option<Uuid>,
}

// ============ API Keys ============

/// API Key
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub role: Role,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// API Key creation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyCreate {
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// API Key creation response (includes full key)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyCreated {
    pub id: Uuid,
    pub name: String,
    pub key: String, // Only shown once
    pub role: Role,
    pub scopes: Vec<String>,
}

// ============ Tokens ============

/// Token mint request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub email: String,
}

/// Issued bearer token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

// ============ Usage ============

/// Raw usage event as published by other services
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageMessage {
    /// `atlas.ai.usage` or `atlas.scan.requests`
    pub stream: String,
    #[schema(value_type = Object)]
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_transitions() {
        use ProposalStatus::*;
        assert!(Draft.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));

        assert!(!Draft.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_plan_tier_parse() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!(" enterprise ".parse::<PlanTier>().unwrap(), PlanTier::Enterprise);
        assert!("platinum".parse::<PlanTier>().is_err());
    }

    #[test]
    fn test_ci_event_serializes_ref() {
        let event = CiEvent {
            id: Uuid::new_v4(),
            platform: Platform::Github,
            event_type: "push".into(),
            repository: "acme/backend".into(),
            git_ref: "refs/heads/main".into(),
            sender: "octocat".into(),
            action: None,
            received_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["ref"], "refs/heads/main");
        assert_eq!(json["platform"], "github");
    }
}
