//! Usage accounting worker
//!
//! Consumes usage events published by the scanner and AI services and
//! folds them into per-tenant counters.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::models::UsageMessage;
use crate::store::{StoreResult, TenantRepository};

/// Stream carrying AI token consumption
pub const AI_USAGE_STREAM: &str = "atlas.ai.usage";

/// Stream carrying scan requests
pub const SCAN_REQUESTS_STREAM: &str = "atlas.scan.requests";

/// Tenant charged when an event names none
pub const DEFAULT_TENANT: &str = "default";

/// Tenant named by a usage payload
///
/// Looks at `tenant_id`, then `metadata.tenant_id`.
pub fn tenant_of(payload: &Value) -> String {
    payload
        .get("tenant_id")
        .or_else(|| payload.get("metadata").and_then(|m| m.get("tenant_id")))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}

/// Tokens reported by a usage payload. Fractional counts round to nearest.
fn tokens_of(payload: &Value) -> i64 {
    match payload.get("tokens_used") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Usage worker
pub struct UsageWorker {
    tenants: Arc<dyn TenantRepository>,
    rx: mpsc::Receiver<UsageMessage>,
    shutdown: watch::Receiver<bool>,
}

impl UsageWorker {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        rx: mpsc::Receiver<UsageMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { tenants, rx, shutdown }
    }

    /// Run until the channel closes or shutdown is signalled
    pub async fn run(mut self) {
        tracing::info!("Usage worker started");

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.process(&msg).await {
                            tracing::error!("Failed to process usage event on {}: {}", msg.stream, e);
                        }
                    }
                    None => break,
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Usage worker stopped");
    }

    /// Apply one usage event
    pub async fn process(&self, msg: &UsageMessage) -> StoreResult<()> {
        let tenant_id = tenant_of(&msg.payload);

        match msg.stream.as_str() {
            AI_USAGE_STREAM => {
                let tokens = tokens_of(&msg.payload);
                self.tenants.ensure_tenant(&tenant_id).await?;
                self.tenants.add_tokens(&tenant_id, tokens).await?;
                tracing::debug!("Tenant {} used {} tokens", tenant_id, tokens);
            }
            SCAN_REQUESTS_STREAM => {
                self.tenants.ensure_tenant(&tenant_id).await?;
                self.tenants.add_scan(&tenant_id).await?;
                tracing::debug!("Tenant {} requested a scan", tenant_id);
            }
            other => {
                tracing::warn!("Ignoring usage event on unknown stream '{}'", other);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn message(stream: &str, payload: Value) -> UsageMessage {
        UsageMessage { stream: stream.into(), payload }
    }

    #[test]
    fn test_tenant_resolution() {
        assert_eq!(tenant_of(&json!({"tenant_id": "acme"})), "acme");
        assert_eq!(tenant_of(&json!({"metadata": {"tenant_id": "globex"}})), "globex");
        assert_eq!(tenant_of(&json!({"tokens_used": 5})), "default");
        assert_eq!(tenant_of(&json!({"tenant_id": ""})), "default");
    }

    #[test]
    fn test_tokens_accept_strings() {
        assert_eq!(tokens_of(&json!({"tokens_used": 42})), 42);
        assert_eq!(tokens_of(&json!({"tokens_used": "17"})), 17);
        assert_eq!(tokens_of(&json!({})), 0);
    }

    #[test]
    fn test_fractional_tokens_round() {
        assert_eq!(tokens_of(&json!({"tokens_used": 12.5})), 13);
        assert_eq!(tokens_of(&json!({"tokens_used": 12.4})), 12);
        assert_eq!(tokens_of(&json!({"tokens_used": "7.6"})), 8);
        assert_eq!(tokens_of(&json!({"tokens_used": "lots"})), 0);
    }

    #[tokio::test]
    async fn test_worker_counts_usage() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = UsageWorker::new(store.clone(), rx, shutdown_rx);
        let handle = tokio::spawn(worker.run());

        tx.send(message(AI_USAGE_STREAM, json!({"tenant_id": "acme", "tokens_used": 300})))
            .await
            .unwrap();
        tx.send(message(SCAN_REQUESTS_STREAM, json!({"metadata": {"tenant_id": "acme"}})))
            .await
            .unwrap();
        tx.send(message("atlas.unknown", json!({"tenant_id": "acme"}))).await.unwrap();
        tx.send(message(SCAN_REQUESTS_STREAM, json!({}))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let acme = store.usage_for("acme").unwrap();
        assert_eq!(acme.token_count, 300);
        assert_eq!(acme.scans_count, 1);
        assert_eq!(store.usage_for("default").unwrap().scans_count, 1);

        let tenant = store.get_tenant("acme").await.unwrap().unwrap();
        assert_eq!(tenant.plan_tier, crate::models::PlanTier::Free);
    }

    #[tokio::test]
    async fn test_worker_survives_store_errors() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = UsageWorker::new(store.clone(), rx, shutdown_rx);
        let handle = tokio::spawn(worker.run());

        store.set_available(false);
        tx.send(message(SCAN_REQUESTS_STREAM, json!({"tenant_id": "acme"}))).await.unwrap();
        // Let the failing message drain before the store recovers
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        store.set_available(true);
        tx.send(message(SCAN_REQUESTS_STREAM, json!({"tenant_id": "acme"}))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.usage_for("acme").unwrap().scans_count, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(UsageWorker::new(store, rx, shutdown_rx).run());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
