//! Score alert notifications
//!
//! Rules watch a pipeline's scan scores. When a new snapshot crosses a
//! threshold an alert is queued and delivered as a signed JSON POST to the
//! rule's target URL, retrying with exponential backoff before giving up
//! into a dead-letter list.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Snapshot;
use crate::signing;

/// Event type sent in `X-Atlas-Event`
pub const THRESHOLD_EVENT: &str = "pipeline.threshold_exceeded";

/// Score thresholds of a rule; unset bounds never fire
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertThresholds {
    pub complexity_max: Option<f64>,
    pub fragility_max: Option<f64>,
    pub maturity_min: Option<f64>,
}

/// Notification rule
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRule {
    pub id: Uuid,
    /// Pipeline name the rule watches
    pub graph_name: String,
    /// URL alerts are POSTed to
    pub target: String,
    pub thresholds: AlertThresholds,
    pub enabled: bool,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationRule {
    pub fn new(input: NotificationRuleCreate) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph_name: input.graph_name,
            target: input.target,
            thresholds: input.thresholds,
            enabled: input.enabled,
            secret: input.secret,
            created_at: Utc::now(),
        }
    }

    /// Whether the given scores breach this rule
    pub fn should_alert(&self, complexity: f64, fragility: f64, maturity: f64) -> bool {
        if !self.enabled {
            return false;
        }
        let t = &self.thresholds;
        t.complexity_max.is_some_and(|max| complexity > max)
            || t.fragility_max.is_some_and(|max| fragility > max)
            || t.maturity_min.is_some_and(|min| maturity < min)
    }
}

fn default_enabled() -> bool {
    true
}

/// Notification rule creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRuleCreate {
    pub graph_name: String,
    pub target: String,
    #[serde(default)]
    pub thresholds: AlertThresholds,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// HMAC key for `X-Atlas-Signature`
    #[serde(default)]
    pub secret: String,
}

/// Payload POSTed to a rule target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub event_type: String,
    pub rule_id: Uuid,
    pub graph_name: String,
    pub graph_id: String,
    pub complexity_score: f64,
    pub fragility_score: f64,
    pub maturity_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay: Duration::from_secs(60) }
    }
}

/// Queued delivery
#[derive(Debug, Clone)]
struct QueuedAlert {
    event: AlertEvent,
    attempt: u32,
    next_attempt: DateTime<Utc>,
}

/// Alert that exhausted its retries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: AlertEvent,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Rule registry and delivery queue
pub struct NotificationDispatcher {
    rules: Arc<RwLock<HashMap<Uuid, NotificationRule>>>,
    queue: Arc<RwLock<Vec<QueuedAlert>>>,
    dead_letter: Arc<RwLock<Vec<DeadLetter>>>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(RwLock::new(Vec::new())),
            dead_letter: Arc::new(RwLock::new(Vec::new())),
            retry,
            client: reqwest::Client::new(),
        }
    }

    pub fn add_rule(&self, input: NotificationRuleCreate) -> NotificationRule {
        let rule = NotificationRule::new(input);
        self.rules.write().insert(rule.id, rule.clone());
        tracing::info!("Notification rule {} added for '{}'", rule.id, rule.graph_name);
        rule
    }

    /// Rules, oldest first
    pub fn list_rules(&self) -> Vec<NotificationRule> {
        let mut rules: Vec<_> = self.rules.read().values().cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        rules
    }

    pub fn remove_rule(&self, id: Uuid) -> bool {
        self.rules.write().remove(&id).is_some()
    }

    /// Queue an alert for every enabled rule the snapshot breaches
    pub fn evaluate(&self, snapshot: &Snapshot) -> usize {
        let matching: Vec<NotificationRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.graph_name == snapshot.graph_name)
            .filter(|r| {
                r.should_alert(
                    snapshot.complexity_score,
                    snapshot.fragility_score,
                    snapshot.maturity_score,
                )
            })
            .cloned()
            .collect();

        let now = Utc::now();
        let mut queue = self.queue.write();
        for rule in &matching {
            tracing::info!("Snapshot of '{}' breached rule {}", snapshot.graph_name, rule.id);
            queue.push(QueuedAlert {
                event: AlertEvent {
                    id: Uuid::new_v4(),
                    event_type: THRESHOLD_EVENT.to_string(),
                    rule_id: rule.id,
                    graph_name: snapshot.graph_name.clone(),
                    graph_id: snapshot.graph_id.clone(),
                    complexity_score: snapshot.complexity_score,
                    fragility_score: snapshot.fragility_score,
                    maturity_score: snapshot.maturity_score,
                    timestamp: now,
                },
                attempt: 0,
                next_attempt: now,
            });
        }
        matching.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.read().len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letter.read().clone()
    }

    /// Deliver every queued alert that is due
    pub async fn process(&self) {
        let now = Utc::now();
        let due: Vec<QueuedAlert> = {
            let mut queue = self.queue.write();
            let (due, later): (Vec<QueuedAlert>, Vec<QueuedAlert>) =
                queue.drain(..).partition(|q| q.next_attempt <= now);
            *queue = later;
            due
        };

        for mut queued in due {
            let rule = self.rules.read().get(&queued.event.rule_id).cloned();
            let Some(rule) = rule else {
                tracing::debug!("Dropping alert {}: rule removed", queued.event.id);
                continue;
            };

            match self.deliver(&rule, &queued.event).await {
                Ok(()) => {
                    tracing::info!("Alert {} delivered to {}", queued.event.id, rule.target);
                }
                Err(e) => {
                    queued.attempt += 1;
                    if queued.attempt < self.retry.max_retries {
                        let delay = self.retry.base_delay * 2u32.pow(queued.attempt);
                        tracing::warn!(
                            "Alert {} delivery failed (attempt {}): {}; retrying in {:?}",
                            queued.event.id, queued.attempt, e, delay
                        );
                        queued.next_attempt = Utc::now()
                            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                        self.queue.write().push(queued);
                    } else {
                        tracing::error!(
                            "Alert {} moved to dead letter after {} attempts: {}",
                            queued.event.id, queued.attempt, e
                        );
                        self.dead_letter.write().push(DeadLetter {
                            event: queued.event,
                            attempts: queued.attempt,
                            error: e,
                            failed_at: Utc::now(),
                        });
                    }
                }
            }
        }
    }

    async fn deliver(&self, rule: &NotificationRule, event: &AlertEvent) -> Result<(), String> {
        let payload = serde_json::to_vec(event).map_err(|e| e.to_string())?;
        let signature = format!("sha256={}", signing::sign(&rule.secret, &payload));

        let resp = self
            .client
            .post(&rule.target)
            .header("Content-Type", "application/json")
            .header("X-Atlas-Signature", signature)
            .header("X-Atlas-Event", &event.event_type)
            .body(payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", resp.status()))
        }
    }

    /// Process the queue on every tick until shutdown
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Notification dispatcher started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.process().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Notification dispatcher stopped");
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
