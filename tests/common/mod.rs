#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use atlas_api::middleware::auth::{AuthUser, Role};
use atlas_api::notifications::{NotificationDispatcher, RetryPolicy};
use atlas_api::store::{MemoryStore, Store};
use atlas_api::usage::UsageWorker;
use atlas_api::{build_router, ApiConfig, ApiState, UsageMessage};

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<ApiState>,
    pub memory: Arc<MemoryStore>,
    usage_rx: Option<mpsc::Receiver<UsageMessage>>,
    shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ApiConfig::development())
    }

    pub fn with_config(config: ApiConfig) -> Self {
        let (store, memory) = Store::memory();
        let (usage_tx, usage_rx) = mpsc::channel(64);
        let notifications = Arc::new(NotificationDispatcher::new(RetryPolicy::default()));
        let state = Arc::new(ApiState::new(config, store, usage_tx, notifications).unwrap());
        let server = TestServer::new(build_router(state.clone())).unwrap();
        let (shutdown, _) = watch::channel(false);

        Self { server, state, memory, usage_rx: Some(usage_rx), shutdown }
    }

    /// Start the usage worker against the in-memory store
    pub fn start_usage_worker(&mut self) -> tokio::task::JoinHandle<()> {
        let rx = self.usage_rx.take().expect("usage worker already started");
        let worker = UsageWorker::new(self.state.store.tenants.clone(), rx, self.shutdown.subscribe());
        tokio::spawn(worker.run())
    }

    /// Pull the next queued usage event without a worker
    pub fn next_usage_message(&mut self) -> Option<UsageMessage> {
        self.usage_rx.as_mut()?.try_recv().ok()
    }

    pub fn token(&self, role: Role) -> String {
        let user = AuthUser::new(format!("user-{role}"), format!("{role}-user"), role);
        self.state.tokens.issue(&user).unwrap()
    }

    pub fn auth(&self, role: Role) -> (HeaderName, HeaderValue) {
        bearer(&self.token(role))
    }
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

pub fn tenant(id: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static("x-tenant-id"), HeaderValue::from_static(id))
}

pub trait RequestExt {
    fn with(self, header: (HeaderName, HeaderValue)) -> Self;
}

impl RequestExt for axum_test::TestRequest {
    fn with(self, (name, value): (HeaderName, HeaderValue)) -> Self {
        self.add_header(name, value)
    }
}

/// Poll until `check` passes or a second has elapsed
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
