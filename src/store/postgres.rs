//! PostgreSQL repositories (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

use super::{
    GraphRepository, ProposalRepository, SnapshotRepository, StoreError, StoreHealth,
    StoreResult, TenantRepository, WebhookEventRepository,
};
use crate::config::ApiConfig;
use crate::models::{
    BillingStatus, CiEvent, GraphRecord, GraphSummary, PlanTier, Platform, Proposal,
    ProposalComment, ProposalStatus, Snapshot, Tenant, TenantStats,
};

/// Tables owned by this service. `cicd_graphs` belongs to the graph service.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tenants (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        plan_tier   TEXT NOT NULL DEFAULT 'free',
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tenant_usage (
        tenant_id     TEXT PRIMARY KEY REFERENCES tenants(id) ON DELETE CASCADE,
        scans_count   BIGINT NOT NULL DEFAULT 0,
        token_count   BIGINT NOT NULL DEFAULT 0,
        last_updated  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS proposals (
        id                UUID PRIMARY KEY,
        graph_id          TEXT NOT NULL,
        plan_id           TEXT NOT NULL,
        title             TEXT NOT NULL,
        description       TEXT NOT NULL DEFAULT '',
        author            TEXT NOT NULL DEFAULT '',
        status            TEXT NOT NULL,
        suggestion_count  BIGINT NOT NULL DEFAULT 0,
        diff_preview      TEXT NOT NULL DEFAULT '',
        comments          JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at        TIMESTAMPTZ NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS snapshots (
        id                UUID PRIMARY KEY,
        graph_name        TEXT NOT NULL,
        graph_id          TEXT NOT NULL DEFAULT '',
        complexity_score  DOUBLE PRECISION NOT NULL,
        fragility_score   DOUBLE PRECISION NOT NULL,
        maturity_score    DOUBLE PRECISION NOT NULL,
        finding_count     BIGINT NOT NULL,
        node_count        BIGINT NOT NULL,
        edge_count        BIGINT NOT NULL,
        scanned_at        TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS snapshots_graph_name_idx ON snapshots (graph_name, scanned_at)",
    r#"CREATE TABLE IF NOT EXISTS webhook_events (
        id           UUID PRIMARY KEY,
        platform     TEXT NOT NULL,
        event_type   TEXT NOT NULL,
        repository   TEXT,
        ref          TEXT,
        sender       TEXT,
        action       TEXT,
        received_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool sized from the config
    pub async fn connect(config: &ApiConfig) -> StoreResult<Self> {
        tracing::info!(
            "Initializing connection pool to {}:{}/{}",
            config.db_host, config.db_port, config.db_name
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.db_pool_min_size)
            .max_connections(config.db_pool_max_size)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url())
            .await?;

        Ok(Self::new(pool))
    }

    /// Create required tables if they do not already exist
    pub async fn create_tables(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database tables verified/created");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}

fn parse_plan(value: &str) -> StoreResult<PlanTier> {
    value.parse().map_err(StoreError::Corrupt)
}

fn parse_count(column: &str, value: i64) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

#[derive(FromRow)]
struct TenantRow {
    id: String,
    name: String,
    plan_tier: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ProposalRow {
    id: Uuid,
    graph_id: String,
    plan_id: String,
    title: String,
    description: String,
    author: String,
    status: String,
    suggestion_count: i64,
    diff_preview: String,
    comments: Json<Vec<ProposalComment>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = StoreError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(Proposal {
            id: row.id,
            graph_id: row.graph_id,
            plan_id: row.plan_id,
            title: row.title,
            description: row.description,
            author: row.author,
            status: row.status.parse::<ProposalStatus>().map_err(StoreError::Corrupt)?,
            suggestion_count: parse_count("suggestion_count", row.suggestion_count)?,
            diff_preview: row.diff_preview,
            comments: row.comments.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    id: Uuid,
    graph_name: String,
    graph_id: String,
    complexity_score: f64,
    fragility_score: f64,
    maturity_score: f64,
    finding_count: i64,
    node_count: i64,
    edge_count: i64,
    scanned_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Snapshot {
            id: row.id,
            graph_name: row.graph_name,
            graph_id: row.graph_id,
            complexity_score: row.complexity_score,
            fragility_score: row.fragility_score,
            maturity_score: row.maturity_score,
            finding_count: parse_count("finding_count", row.finding_count)?,
            node_count: parse_count("node_count", row.node_count)?,
            edge_count: parse_count("edge_count", row.edge_count)?,
            scanned_at: row.scanned_at,
        })
    }
}

#[derive(FromRow)]
struct CiEventRow {
    id: Uuid,
    platform: String,
    event_type: String,
    repository: Option<String>,
    #[sqlx(rename = "ref")]
    git_ref: Option<String>,
    sender: Option<String>,
    action: Option<String>,
    received_at: DateTime<Utc>,
}

impl TryFrom<CiEventRow> for CiEvent {
    type Error = StoreError;

    fn try_from(row: CiEventRow) -> Result<Self, Self::Error> {
        let platform = match row.platform.as_str() {
            "github" => Platform::Github,
            "gitlab" => Platform::Gitlab,
            other => return Err(StoreError::Corrupt(format!("unknown platform '{other}'"))),
        };
        Ok(CiEvent {
            id: row.id,
            platform,
            event_type: row.event_type,
            repository: row.repository.unwrap_or_default(),
            git_ref: row.git_ref.unwrap_or_default(),
            sender: row.sender.unwrap_or_default(),
            action: row.action,
            received_at: row.received_at,
        })
    }
}

fn platform_str(platform: Platform) -> &'static str {
    match platform {
        Platform::Github => "github",
        Platform::Gitlab => "gitlab",
    }
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn ensure_tenant(&self, tenant_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO tenants (id, name, plan_tier)
               VALUES ($1, $1, 'free')
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO tenant_usage (tenant_id, scans_count, token_count)
               VALUES ($1, 0, 0)
               ON CONFLICT (tenant_id) DO NOTHING"#,
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, plan_tier, created_at FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(Tenant {
                id: r.id,
                name: r.name,
                plan_tier: parse_plan(&r.plan_tier)?,
                created_at: r.created_at,
            })
        })
        .transpose()
    }

    async fn add_tokens(&self, tenant_id: &str, tokens: i64) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE tenant_usage
               SET token_count = token_count + $1, last_updated = NOW()
               WHERE tenant_id = $2"#,
        )
        .bind(tokens)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_scan(&self, tenant_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE tenant_usage
               SET scans_count = scans_count + 1, last_updated = NOW()
               WHERE tenant_id = $1"#,
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_plan(&self, tenant_id: &str, plan: PlanTier) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO tenants (id, name, plan_tier)
               VALUES ($1, $1, $2)
               ON CONFLICT (id) DO UPDATE SET plan_tier = EXCLUDED.plan_tier"#,
        )
        .bind(tenant_id)
        .bind(plan.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn billing_status(&self, tenant_id: &str) -> StoreResult<Option<BillingStatus>> {
        let row = sqlx::query_as::<_, (String, Option<i64>, Option<i64>)>(
            r#"SELECT t.plan_tier, tu.scans_count, tu.token_count
               FROM tenants t
               LEFT JOIN tenant_usage tu ON t.id = tu.tenant_id
               WHERE t.id = $1"#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(plan, scans, tokens)| {
            Ok(BillingStatus {
                plan_tier: parse_plan(&plan)?,
                scans_count: scans.unwrap_or(0),
                token_count: tokens.unwrap_or(0),
            })
        })
        .transpose()
    }

    async fn tenant_stats(&self, limit: usize) -> StoreResult<Vec<TenantStats>> {
        let rows = sqlx::query_as::<_, (String, String, i64, i64)>(
            r#"SELECT
                   t.name,
                   t.plan_tier,
                   COALESCE(tu.scans_count, 0),
                   COALESCE(tu.token_count, 0)
               FROM tenants t
               LEFT JOIN tenant_usage tu ON t.id = tu.tenant_id
               ORDER BY tu.scans_count DESC NULLS LAST, t.name ASC
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(name, plan, scans, tokens)| {
                Ok(TenantStats { name, plan: parse_plan(&plan)?, scans, tokens })
            })
            .collect()
    }
}

#[async_trait]
impl GraphRepository for PgStore {
    async fn list_graphs(&self, limit: usize) -> StoreResult<Vec<GraphSummary>> {
        let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>)>(
            r#"SELECT id::text, name, platform, created_at
               FROM cicd_graphs
               ORDER BY updated_at DESC
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, platform, created_at)| GraphSummary { id, name, platform, created_at })
            .collect())
    }

    async fn get_graph(&self, graph_id: &str) -> StoreResult<Option<GraphRecord>> {
        let row = sqlx::query_as::<_, (String, String, String, serde_json::Value, DateTime<Utc>, DateTime<Utc>)>(
            r#"SELECT id::text, name, platform, data, created_at, updated_at
               FROM cicd_graphs
               WHERE id::text = $1"#,
        )
        .bind(graph_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, platform, data, created_at, updated_at)| GraphRecord {
            id,
            name,
            platform,
            data,
            created_at,
            updated_at,
        }))
    }
}

#[async_trait]
impl ProposalRepository for PgStore {
    async fn insert(&self, proposal: &Proposal) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO proposals
               (id, graph_id, plan_id, title, description, author, status,
                suggestion_count, diff_preview, comments, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(proposal.id)
        .bind(&proposal.graph_id)
        .bind(&proposal.plan_id)
        .bind(&proposal.title)
        .bind(&proposal.description)
        .bind(&proposal.author)
        .bind(proposal.status.as_str())
        .bind(i64::from(proposal.suggestion_count))
        .bind(&proposal.diff_preview)
        .bind(Json(&proposal.comments))
        .bind(proposal.created_at)
        .bind(proposal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>("SELECT * FROM proposals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Proposal::try_from).transpose()
    }

    async fn list(&self, status: Option<ProposalStatus>) -> StoreResult<Vec<Proposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            r#"SELECT * FROM proposals
               WHERE $1::text IS NULL OR status = $1
               ORDER BY created_at ASC"#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Proposal::try_from).collect()
    }

    async fn update(&self, proposal: &Proposal) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE proposals
               SET status = $1, comments = $2, updated_at = $3
               WHERE id = $4"#,
        )
        .bind(proposal.status.as_str())
        .bind(Json(&proposal.comments))
        .bind(proposal.updated_at)
        .bind(proposal.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for PgStore {
    async fn insert(&self, snapshot: &Snapshot) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO snapshots
               (id, graph_name, graph_id, complexity_score, fragility_score, maturity_score,
                finding_count, node_count, edge_count, scanned_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(snapshot.id)
        .bind(&snapshot.graph_name)
        .bind(&snapshot.graph_id)
        .bind(snapshot.complexity_score)
        .bind(snapshot.fragility_score)
        .bind(snapshot.maturity_score)
        .bind(i64::from(snapshot.finding_count))
        .bind(i64::from(snapshot.node_count))
        .bind(i64::from(snapshot.edge_count))
        .bind(snapshot.scanned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_graph(&self, graph_name: &str) -> StoreResult<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM snapshots WHERE graph_name = $1 ORDER BY scanned_at ASC",
        )
        .bind(graph_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Snapshot::try_from).collect()
    }

    async fn latest_for_graph_id(&self, graph_id: &str) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM snapshots WHERE graph_id = $1 ORDER BY scanned_at DESC LIMIT 1",
        )
        .bind(graph_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Snapshot::try_from).transpose()
    }
}

#[async_trait]
impl WebhookEventRepository for PgStore {
    async fn insert(&self, event: &CiEvent) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO webhook_events
               (id, platform, event_type, repository, ref, sender, action, received_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(event.id)
        .bind(platform_str(event.platform))
        .bind(&event.event_type)
        .bind(&event.repository)
        .bind(&event.git_ref)
        .bind(&event.sender)
        .bind(&event.action)
        .bind(event.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> StoreResult<Vec<CiEvent>> {
        let rows = sqlx::query_as::<_, CiEventRow>(
            r#"SELECT * FROM (
                   SELECT id, platform, event_type, repository, ref, sender, action, received_at
                   FROM webhook_events
                   ORDER BY received_at DESC
                   LIMIT $1
               ) recent
               ORDER BY received_at ASC"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CiEvent::try_from).collect()
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_row(node_count: i64) -> SnapshotRow {
        SnapshotRow {
            id: Uuid::new_v4(),
            graph_name: "deploy".into(),
            graph_id: "g-1".into(),
            complexity_score: 40.0,
            fragility_score: 20.0,
            maturity_score: 70.0,
            finding_count: 3,
            node_count,
            edge_count: 12,
            scanned_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_keep_full_u32_range() {
        let row = snapshot_row(i64::from(u32::MAX));
        let snapshot = Snapshot::try_from(row).unwrap();
        assert_eq!(snapshot.node_count, u32::MAX);
        assert_eq!(snapshot.finding_count, 3);
    }

    #[test]
    fn test_out_of_range_count_is_corrupt() {
        let err = Snapshot::try_from(snapshot_row(-1)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("node_count")));

        let err = Snapshot::try_from(snapshot_row(i64::from(u32::MAX) + 1)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
