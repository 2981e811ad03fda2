//! Provider selection helpers
//!
//! This module decides:
//! - whether a failed request may move to another provider
//! - which provider serves as the single fallback
//! - how available providers rank by current health

use std::cmp::Ordering;

use crate::error::{ErrorKind, ProviderError};
use crate::health_check::ProviderHealthStatus;
use crate::models::ProviderKind;

/// Outcome of classifying a primary failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Re-issue the request against the fallback provider
    Fallback,
    /// Surface the error as is
    Surface,
}

/// Classify a primary failure
///
/// Cancellation is the caller's decision and is never routed elsewhere.
/// Every other failure belongs to the primary provider, so another
/// provider may still succeed.
pub fn classify_failure(error: &ProviderError) -> FallbackDecision {
    match error.kind {
        ErrorKind::Aborted => FallbackDecision::Surface,
        _ => FallbackDecision::Fallback,
    }
}

/// First provider in `available` (already in priority order) other than `primary`
pub fn select_fallback(primary: ProviderKind, available: &[ProviderKind]) -> Option<ProviderKind> {
    available.iter().copied().find(|kind| *kind != primary)
}

/// Compare two candidates; `Less` means `a` is healthier
///
/// Order: health state, then fewer consecutive failures, then most recent
/// success, then lower latency, then position in the priority list.
pub fn compare_health(
    a: (ProviderKind, &ProviderHealthStatus),
    b: (ProviderKind, &ProviderHealthStatus),
    priority: &[ProviderKind],
) -> Ordering {
    let (kind_a, status_a) = a;
    let (kind_b, status_b) = b;
    let position = |kind: ProviderKind| priority.iter().position(|k| *k == kind).unwrap_or(usize::MAX);

    status_a
        .state
        .rank()
        .cmp(&status_b.state.rank())
        .then(status_a.consecutive_failures.cmp(&status_b.consecutive_failures))
        // Newer success first; never-succeeded sorts last
        .then(status_b.last_success.cmp(&status_a.last_success))
        .then(
            status_a
                .response_time_ms
                .unwrap_or(u64::MAX)
                .cmp(&status_b.response_time_ms.unwrap_or(u64::MAX)),
        )
        .then(position(kind_a).cmp(&position(kind_b)))
}

/// Healthiest candidate, if any
pub fn healthiest(
    candidates: &[(ProviderKind, ProviderHealthStatus)],
    priority: &[ProviderKind],
) -> Option<ProviderKind> {
    candidates
        .iter()
        .min_by(|a, b| compare_health((a.0, &a.1), (b.0, &b.1), priority))
        .map(|(kind, _)| *kind)
}
