//! Activity log engine
//!
//! Write path per event: classify → disabled-set check → sampling
//! (informational only) → anomaly gate → retention stamp → async persist.
//! Persistence is best-effort; a logging failure never fails the caller.
//! A single background sweeper deletes expired rows in batches.

use crate::config::ActivityConfig;
use crate::domain::{
    ActivityLog, ActivityLogQuery, CreateActivityLogInput, EventType, Severity, StringUuid,
};
use crate::error::Result;
use crate::kv::KvOperations;
use crate::repository::ActivityLogRepository;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Number of remembered IPs / user-agents per user
const FINGERPRINT_RING: usize = 10;

/// Request-scoped metadata attached to an event
#[derive(Debug, Clone, Default)]
pub struct EventMeta {
    pub app_id: StringUuid,
    pub user_id: Option<StringUuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
}

/// Remembered IP / user-agent ring, stored as JSON under the anomaly key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Fingerprint {
    ips: Vec<String>,
    user_agents: Vec<String>,
}

impl Fingerprint {
    /// Returns true when the value was not seen before; appends it either
    /// way, keeping the last `FINGERPRINT_RING` entries.
    fn observe(list: &mut Vec<String>, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        // Exact string match; no normalization
        let known = list.iter().any(|v| v == value);
        if !known {
            list.push(value.to_string());
            if list.len() > FINGERPRINT_RING {
                let excess = list.len() - FINGERPRINT_RING;
                list.drain(..excess);
            }
        }
        !known
    }
}

pub struct ActivityLogEngine {
    repo: Arc<dyn ActivityLogRepository>,
    kv: Arc<dyn KvOperations>,
    config: ActivityConfig,
}

impl ActivityLogEngine {
    pub fn new(
        repo: Arc<dyn ActivityLogRepository>,
        kv: Arc<dyn KvOperations>,
        config: ActivityConfig,
    ) -> Self {
        Self { repo, kv, config }
    }

    pub fn repository(&self) -> Arc<dyn ActivityLogRepository> {
        self.repo.clone()
    }

    fn retention_days(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.config.retention_critical_days,
            Severity::Important => self.config.retention_important_days,
            Severity::Informational => self.config.retention_informational_days,
        }
    }

    /// Fire-and-forget entry point used by request handlers
    pub fn record(self: &Arc<Self>, event: EventType, meta: EventMeta) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.record_sync(event, meta).await {
                tracing::warn!(event = event.as_str(), error = %e, "Failed to record activity event");
            }
        });
    }

    /// The full write path; exposed for deterministic testing
    pub async fn record_sync(&self, event: EventType, meta: EventMeta) -> Result<()> {
        let name = event.as_str();
        let severity = event.severity();
        let disabled = self.config.disabled_events.contains(name);
        let anomaly_eligible =
            self.config.anomaly_detection_enabled && severity == Severity::Informational;

        // Disabled events are dropped outright unless anomaly detection may
        // still rescue them
        if disabled && !anomaly_eligible {
            metrics::counter!("authgate_activity_events_total", "outcome" => "disabled")
                .increment(1);
            return Ok(());
        }

        // Sampling applies to informational events only
        let mut sampled_out = false;
        if severity == Severity::Informational {
            if let Some(&rate) = self.config.sampling_rates.get(name) {
                if rate < 1.0 && rand::thread_rng().gen::<f64>() >= rate {
                    sampled_out = true;
                }
            }
        }

        // Anomaly check; a detected anomaly rescues dropped events
        let mut is_anomaly = false;
        if anomaly_eligible {
            if let Some(user_id) = meta.user_id {
                is_anomaly = self.check_anomaly(meta.app_id, user_id, &meta).await;
            }
        }

        if (disabled || sampled_out) && !is_anomaly {
            metrics::counter!("authgate_activity_events_total", "outcome" => "dropped")
                .increment(1);
            return Ok(());
        }

        let now = Utc::now();
        let input = CreateActivityLogInput {
            app_id: meta.app_id,
            user_id: meta.user_id,
            event_type: name.to_string(),
            severity: severity.as_str().to_string(),
            timestamp: now,
            ip: meta.ip,
            user_agent: meta.user_agent,
            details: meta.details,
            expires_at: now + Duration::days(self.retention_days(severity)),
            is_anomaly,
        };

        self.repo.create(&input).await?;
        metrics::counter!("authgate_activity_events_total", "outcome" => "recorded").increment(1);
        Ok(())
    }

    /// Update the user's fingerprint memory and report whether this request
    /// came from an unseen IP or user-agent.
    async fn check_anomaly(&self, app_id: StringUuid, user_id: StringUuid, meta: &EventMeta) -> bool {
        let mut fingerprint = match self.kv.get_anomaly_fingerprint(app_id, user_id).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Fingerprint::default(),
            Err(e) => {
                tracing::debug!(error = %e, "Fingerprint read failed, skipping anomaly check");
                return false;
            }
        };

        let first_sighting = fingerprint.ips.is_empty() && fingerprint.user_agents.is_empty();

        let new_ip = meta
            .ip
            .as_deref()
            .map(|ip| Fingerprint::observe(&mut fingerprint.ips, ip))
            .unwrap_or(false);
        let new_agent = meta
            .user_agent
            .as_deref()
            .map(|ua| Fingerprint::observe(&mut fingerprint.user_agents, ua))
            .unwrap_or(false);

        let ttl = (self.config.anomaly_session_window_days * 86_400).max(0) as u64;
        if let Ok(payload) = serde_json::to_string(&fingerprint) {
            if let Err(e) = self
                .kv
                .set_anomaly_fingerprint(app_id, user_id, &payload, ttl)
                .await
            {
                tracing::debug!(error = %e, "Fingerprint write failed");
            }
        }

        // The very first sighting trains the memory without flagging
        !first_sighting && (new_ip || new_agent)
    }

    pub async fn find(&self, query: &ActivityLogQuery) -> Result<Vec<ActivityLog>> {
        self.repo.find(query).await
    }

    pub async fn count(&self, query: &ActivityLogQuery) -> Result<i64> {
        self.repo.count(query).await
    }

    /// One full sweep: delete expired rows in batches, pausing briefly
    /// between batches to avoid lock contention. Returns rows deleted.
    pub async fn sweep_once(&self) -> Result<u64> {
        let batch = self.config.cleanup_batch_size;
        let mut total = 0u64;
        loop {
            let deleted = self.repo.delete_expired(batch).await?;
            total += deleted;
            if deleted < batch as u64 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        if total > 0 {
            tracing::info!(deleted = total, "Activity log sweep removed expired rows");
        }
        Ok(total)
    }

    /// GDPR: remove every log row belonging to a user
    pub async fn delete_user_logs(&self, user_id: StringUuid) -> Result<u64> {
        self.repo.delete_for_user(user_id).await
    }
}

/// Scheduled sweeper; one per process, cooperating with shutdown. The
/// in-flight batch loop finishes before the worker exits.
pub async fn run_sweeper(engine: Arc<ActivityLogEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(engine.config.cleanup_interval_secs));
    // The first tick fires immediately; skip it so startup is quiet
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = engine.sweep_once().await {
                    tracing::error!(error = %e, "Activity log sweep failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::debug!("Activity log sweeper shutting down");
                break;
            }
        }
    }
}
