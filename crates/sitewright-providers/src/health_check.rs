//! Per-provider health tracking
//!
//! Each provider has one [`HealthTracker`]. It turns observed successes and
//! failures (from real requests or explicit probes) into a coarse state:
//! one or more consecutive failures degrade a provider, and reaching the
//! unhealthy threshold marks it unhealthy. Any success restores it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::models::{Message, ProviderKind};
use crate::options::GenerateOptions;
use crate::provider::Provider;

/// Prompt sent by health probes
pub const PROBE_PROMPT: &str = "ping";
/// Output cap for health probes
pub const PROBE_MAX_TOKENS: u32 = 8;

/// Thresholds for health classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    /// Consecutive failures at which a provider becomes unhealthy
    pub unhealthy_threshold: u32,
    /// Snapshots kept in the metrics history
    pub history_limit: usize,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            history_limit: 100,
        }
    }
}

/// Coarse health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthState {
    /// Sort key for choosing providers; lower is better
    pub fn rank(&self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Unknown => 1,
            HealthState::Degraded => 2,
            HealthState::Unhealthy => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current health of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthStatus {
    pub state: HealthState,
    /// When the last observation was recorded
    pub last_checked: Option<DateTime<Utc>>,
    /// Latency of the last successful observation
    pub response_time_ms: Option<u64>,
    /// Message of the last failure, cleared by a success
    pub error_message: Option<String>,
    pub consecutive_failures: u32,
    /// Whether the provider had its credential at the last observation
    pub is_available: bool,
    /// When the provider last succeeded
    pub last_success: Option<DateTime<Utc>>,
}

impl ProviderHealthStatus {
    fn unknown(is_available: bool) -> Self {
        Self {
            state: HealthState::Unknown,
            last_checked: None,
            response_time_ms: None,
            error_message: None,
            consecutive_failures: 0,
            is_available,
            last_success: None,
        }
    }
}

/// Cumulative counters plus a capped history of snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthMetrics {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    /// Mean latency over successful observations
    pub average_response_time_ms: f64,
    /// Share of successful observations, 0-100
    pub uptime_percentage: f64,
    /// Oldest first; capped at the policy's history limit
    pub history: Vec<ProviderHealthStatus>,
}

#[derive(Debug)]
struct HealthInner {
    status: ProviderHealthStatus,
    total_checks: u64,
    successful_checks: u64,
    failed_checks: u64,
    total_response_time_ms: u64,
    timed_successes: u64,
    history: VecDeque<ProviderHealthStatus>,
}

/// Health tracker for one provider
pub struct HealthTracker {
    kind: ProviderKind,
    client: Arc<dyn Provider>,
    policy: HealthPolicy,
    inner: Mutex<HealthInner>,
}

impl HealthTracker {
    pub fn new(kind: ProviderKind, client: Arc<dyn Provider>, policy: HealthPolicy) -> Self {
        let status = ProviderHealthStatus::unknown(client.is_available());
        Self {
            kind,
            client,
            policy,
            inner: Mutex::new(HealthInner {
                status,
                total_checks: 0,
                successful_checks: 0,
                failed_checks: 0,
                total_response_time_ms: 0,
                timed_successes: 0,
                history: VecDeque::new(),
            }),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Probe the provider with a minimal generation and record the outcome
    ///
    /// The probe makes a single attempt and never falls back.
    pub async fn check_health(&self) -> ProviderHealthStatus {
        let options = GenerateOptions::new()
            .with_max_output_tokens(PROBE_MAX_TOKENS)
            .with_max_attempts(1)
            .without_fallback();
        let started = Instant::now();

        match self
            .client
            .generate(&[Message::user(PROBE_PROMPT)], &options)
            .await
        {
            Ok(_) => self.record_success(started.elapsed()),
            Err(e) => self.record_failure(&e),
        }
    }

    /// Record a successful call
    pub fn record_success(&self, latency: Duration) -> ProviderHealthStatus {
        let latency_ms = latency.as_millis() as u64;
        let now = Utc::now();
        let is_available = self.client.is_available();

        let mut inner = self.inner.lock();
        inner.total_checks += 1;
        inner.successful_checks += 1;
        inner.total_response_time_ms += latency_ms;
        inner.timed_successes += 1;

        let status = &mut inner.status;
        if status.state != HealthState::Healthy && status.state != HealthState::Unknown {
            debug!(provider = %self.kind, "Provider recovered");
        }
        status.state = HealthState::Healthy;
        status.consecutive_failures = 0;
        status.last_checked = Some(now);
        status.last_success = Some(now);
        status.response_time_ms = Some(latency_ms);
        status.error_message = None;
        status.is_available = is_available;

        let snapshot = status.clone();
        self.push_history(&mut inner, snapshot.clone());
        snapshot
    }

    /// Record a failed call
    pub fn record_failure(&self, error: &ProviderError) -> ProviderHealthStatus {
        let is_available = self.client.is_available();

        let mut inner = self.inner.lock();
        inner.total_checks += 1;
        inner.failed_checks += 1;

        let status = &mut inner.status;
        status.consecutive_failures += 1;
        status.state = if status.consecutive_failures >= self.policy.unhealthy_threshold {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };
        status.last_checked = Some(Utc::now());
        status.error_message = Some(error.to_string());
        status.is_available = is_available;

        if status.state == HealthState::Unhealthy {
            warn!(
                provider = %self.kind,
                consecutive_failures = status.consecutive_failures,
                "Provider marked unhealthy"
            );
        }

        let snapshot = status.clone();
        self.push_history(&mut inner, snapshot.clone());
        snapshot
    }

    fn push_history(&self, inner: &mut HealthInner, snapshot: ProviderHealthStatus) {
        inner.history.push_back(snapshot);
        while inner.history.len() > self.policy.history_limit.max(1) {
            inner.history.pop_front();
        }
    }

    /// Current status
    pub fn status(&self) -> ProviderHealthStatus {
        self.inner.lock().status.clone()
    }

    /// Cumulative metrics and recent history
    pub fn metrics(&self) -> ProviderHealthMetrics {
        let inner = self.inner.lock();
        let average_response_time_ms = if inner.timed_successes == 0 {
            0.0
        } else {
            inner.total_response_time_ms as f64 / inner.timed_successes as f64
        };
        let uptime_percentage = if inner.total_checks == 0 {
            0.0
        } else {
            inner.successful_checks as f64 * 100.0 / inner.total_checks as f64
        };

        ProviderHealthMetrics {
            total_checks: inner.total_checks,
            successful_checks: inner.successful_checks,
            failed_checks: inner.failed_checks,
            average_response_time_ms,
            uptime_percentage,
            history: inner.history.iter().cloned().collect(),
        }
    }

    /// Return to `Unknown` with no failures; cumulative metrics are kept
    pub fn reset(&self) {
        let is_available = self.client.is_available();
        self.inner.lock().status = ProviderHealthStatus::unknown(is_available);
        debug!(provider = %self.kind, "Health reset");
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish()
    }
}
