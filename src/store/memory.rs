//! In-memory repository implementations
//!
//! Used by the test suite and by `--in-memory` development runs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    GraphRepository, ProposalRepository, SnapshotRepository, StoreError, StoreHealth,
    StoreResult, TenantRepository, WebhookEventRepository,
};
use crate::models::{
    BillingStatus, CiEvent, GraphRecord, GraphSummary, PlanTier, Proposal, ProposalStatus,
    Snapshot, Tenant, TenantStats, UsageCounters,
};

/// In-memory store
pub struct MemoryStore {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
    usage: Arc<RwLock<HashMap<String, UsageCounters>>>,
    graphs: Arc<RwLock<HashMap<String, GraphRecord>>>,
    proposals: Arc<RwLock<Vec<Proposal>>>,
    snapshots: Arc<RwLock<HashMap<String, Vec<Snapshot>>>>,
    events: Arc<RwLock<Vec<CiEvent>>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
            usage: Arc::new(RwLock::new(HashMap::new())),
            graphs: Arc::new(RwLock::new(HashMap::new())),
            proposals: Arc::new(RwLock::new(Vec::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Stand in for the graph service writing a graph
    pub fn insert_graph(&self, graph: GraphRecord) {
        self.graphs.write().insert(graph.id.clone(), graph);
    }

    /// Simulate an outage; every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn usage_for(&self, tenant_id: &str) -> Option<UsageCounters> {
        self.usage.read().get(tenant_id).cloned()
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Backend("memory store marked unavailable".into()))
        }
    }

    fn new_tenant(tenant_id: &str, plan: PlanTier) -> Tenant {
        Tenant {
            id: tenant_id.to_string(),
            name: tenant_id.to_string(),
            plan_tier: plan,
            created_at: Utc::now(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn ensure_tenant(&self, tenant_id: &str) -> StoreResult<()> {
        self.check()?;
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_insert_with(|| Self::new_tenant(tenant_id, PlanTier::Free));
        self.usage.write().entry(tenant_id.to_string()).or_default();
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<Tenant>> {
        self.check()?;
        Ok(self.tenants.read().get(tenant_id).cloned())
    }

    async fn add_tokens(&self, tenant_id: &str, tokens: i64) -> StoreResult<()> {
        self.check()?;
        if let Some(usage) = self.usage.write().get_mut(tenant_id) {
            usage.token_count += tokens;
        }
        Ok(())
    }

    async fn add_scan(&self, tenant_id: &str) -> StoreResult<()> {
        self.check()?;
        if let Some(usage) = self.usage.write().get_mut(tenant_id) {
            usage.scans_count += 1;
        }
        Ok(())
    }

    async fn set_plan(&self, tenant_id: &str, plan: PlanTier) -> StoreResult<()> {
        self.check()?;
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .and_modify(|t| t.plan_tier = plan)
            .or_insert_with(|| Self::new_tenant(tenant_id, plan));
        Ok(())
    }

    async fn billing_status(&self, tenant_id: &str) -> StoreResult<Option<BillingStatus>> {
        self.check()?;
        let tenants = self.tenants.read();
        let Some(tenant) = tenants.get(tenant_id) else {
            return Ok(None);
        };
        let usage = self.usage.read().get(tenant_id).cloned().unwrap_or_default();

        Ok(Some(BillingStatus {
            plan_tier: tenant.plan_tier,
            scans_count: usage.scans_count,
            token_count: usage.token_count,
        }))
    }

    async fn tenant_stats(&self, limit: usize) -> StoreResult<Vec<TenantStats>> {
        self.check()?;
        let tenants = self.tenants.read();
        let usage = self.usage.read();

        let mut stats: Vec<TenantStats> = tenants
            .values()
            .map(|t| {
                let u = usage.get(&t.id).cloned().unwrap_or_default();
                TenantStats {
                    name: t.name.clone(),
                    plan: t.plan_tier,
                    scans: u.scans_count,
                    tokens: u.token_count,
                }
            })
            .collect();

        stats.sort_by(|a, b| b.scans.cmp(&a.scans).then_with(|| a.name.cmp(&b.name)));
        stats.truncate(limit);
        Ok(stats)
    }
}

#[async_trait]
impl GraphRepository for MemoryStore {
    async fn list_graphs(&self, limit: usize) -> StoreResult<Vec<GraphSummary>> {
        self.check()?;
        let graphs = self.graphs.read();
        let mut records: Vec<&GraphRecord> = graphs.values().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records.into_iter().take(limit).map(GraphRecord::summary).collect())
    }

    async fn get_graph(&self, graph_id: &str) -> StoreResult<Option<GraphRecord>> {
        self.check()?;
        Ok(self.graphs.read().get(graph_id).cloned())
    }
}

#[async_trait]
impl ProposalRepository for MemoryStore {
    async fn insert(&self, proposal: &Proposal) -> StoreResult<()> {
        self.check()?;
        self.proposals.write().push(proposal.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Proposal>> {
        self.check()?;
        Ok(self.proposals.read().iter().find(|p| p.id == id).cloned())
    }

    async fn list(&self, status: Option<ProposalStatus>) -> StoreResult<Vec<Proposal>> {
        self.check()?;
        Ok(self
            .proposals
            .read()
            .iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn update(&self, proposal: &Proposal) -> StoreResult<()> {
        self.check()?;
        let mut proposals = self.proposals.write();
        if let Some(existing) = proposals.iter_mut().find(|p| p.id == proposal.id) {
            *existing = proposal.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for MemoryStore {
    async fn insert(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.check()?;
        self.snapshots
            .write()
            .entry(snapshot.graph_name.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn list_for_graph(&self, graph_name: &str) -> StoreResult<Vec<Snapshot>> {
        self.check()?;
        Ok(self.snapshots.read().get(graph_name).cloned().unwrap_or_default())
    }

    async fn latest_for_graph_id(&self, graph_id: &str) -> StoreResult<Option<Snapshot>> {
        self.check()?;
        Ok(self
            .snapshots
            .read()
            .values()
            .flatten()
            .filter(|s| s.graph_id == graph_id)
            .max_by_key(|s| s.scanned_at)
            .cloned())
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn insert(&self, event: &CiEvent) -> StoreResult<()> {
        self.check()?;
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<CiEvent>> {
        self.check()?;
        let events = self.events.read();
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].to_vec())
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}
