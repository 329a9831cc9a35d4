//! Persistence ports
//!
//! Each aggregate has its own repository trait. [`Store`] bundles one
//! implementation of every trait so handlers stay backend-agnostic.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    BillingStatus, CiEvent, GraphRecord, GraphSummary, PlanTier, Proposal, ProposalStatus,
    Snapshot, Tenant, TenantStats,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage error
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row could not be mapped to a domain type
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("backend unavailable: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Tenants, plans and usage counters
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Create the tenant on the free plan and a zeroed usage row, if missing
    async fn ensure_tenant(&self, tenant_id: &str) -> StoreResult<()>;

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<Tenant>>;

    /// Add AI tokens to the tenant's usage
    async fn add_tokens(&self, tenant_id: &str, tokens: i64) -> StoreResult<()>;

    /// Count one scan request
    async fn add_scan(&self, tenant_id: &str) -> StoreResult<()>;

    /// Set the plan, creating the tenant if needed
    async fn set_plan(&self, tenant_id: &str, plan: PlanTier) -> StoreResult<()>;

    async fn billing_status(&self, tenant_id: &str) -> StoreResult<Option<BillingStatus>>;

    /// Tenants ordered by scan count, highest first
    async fn tenant_stats(&self, limit: usize) -> StoreResult<Vec<TenantStats>>;
}

/// Read access to pipeline graphs written by the graph service
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Most recently updated first
    async fn list_graphs(&self, limit: usize) -> StoreResult<Vec<GraphSummary>>;

    async fn get_graph(&self, graph_id: &str) -> StoreResult<Option<GraphRecord>>;
}

/// Refactor proposals
#[async_trait]
pub trait ProposalRepository: Send + Sync {
    async fn insert(&self, proposal: &Proposal) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Proposal>>;

    /// Oldest first
    async fn list(&self, status: Option<ProposalStatus>) -> StoreResult<Vec<Proposal>>;

    async fn update(&self, proposal: &Proposal) -> StoreResult<()>;
}

/// Scan snapshots
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert(&self, snapshot: &Snapshot) -> StoreResult<()>;

    /// All snapshots of a pipeline, oldest first
    async fn list_for_graph(&self, graph_name: &str) -> StoreResult<Vec<Snapshot>>;

    async fn latest_for_graph_id(&self, graph_id: &str) -> StoreResult<Option<Snapshot>>;
}

/// Received CI webhook events
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn insert(&self, event: &CiEvent) -> StoreResult<()>;

    /// The `limit` most recent events, oldest first
    async fn recent(&self, limit: usize) -> StoreResult<Vec<CiEvent>>;
}

/// Backend connectivity probe
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// One backend that implements every repository
pub trait Backend:
    TenantRepository
    + GraphRepository
    + ProposalRepository
    + SnapshotRepository
    + WebhookEventRepository
    + StoreHealth
    + 'static
{
}

impl<T> Backend for T where
    T: TenantRepository
        + GraphRepository
        + ProposalRepository
        + SnapshotRepository
        + WebhookEventRepository
        + StoreHealth
        + 'static
{
}

/// Repository handles shared by all handlers
#[derive(Clone)]
pub struct Store {
    pub tenants: Arc<dyn TenantRepository>,
    pub graphs: Arc<dyn GraphRepository>,
    pub proposals: Arc<dyn ProposalRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub health: Arc<dyn StoreHealth>,
}

impl Store {
    pub fn from_backend<B: Backend>(backend: Arc<B>) -> Self {
        Self {
            tenants: backend.clone(),
            graphs: backend.clone(),
            proposals: backend.clone(),
            snapshots: backend.clone(),
            webhook_events: backend.clone(),
            health: backend,
        }
    }

    /// Fresh in-memory store, returning the backend for seeding
    pub fn memory() -> (Self, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        (Self::from_backend(backend.clone()), backend)
    }
}
