//! Per-client mutable state: the failure registry behind fail-fast blocking
//! and the in-flight registry behind request coalescing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::client::request::ApiResponse;
use crate::error::ApiError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How many 500/503 failures an endpoint may rack up, and for how long
/// they count, before requests to it are refused locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub max_failures: u32,
    pub reset_window: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FailureRecord {
    pub first_failure_at: Instant,
    pub last_failure_at: Instant,
    pub consecutive_failures: u32,
}

/// Endpoint is over its failure ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockedEndpoint {
    pub failures: u32,
    pub retry_after: Duration,
}

pub struct FailureRegistry {
    policy: FailurePolicy,
    entries: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureRegistry {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns the block if the endpoint may not be called right now.
    /// A record whose window has elapsed is dropped here.
    pub fn check(&self, endpoint: &str) -> Option<BlockedEndpoint> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let record = *entries.get(endpoint)?;

        let elapsed = now.saturating_duration_since(record.first_failure_at);
        if elapsed >= self.policy.reset_window {
            entries.remove(endpoint);
            return None;
        }

        (record.consecutive_failures >= self.policy.max_failures).then(|| BlockedEndpoint {
            failures: record.consecutive_failures,
            retry_after: self.policy.reset_window - elapsed,
        })
    }

    /// Count a failure and return the running total for the current window
    pub fn record_failure(&self, endpoint: &str) -> u32 {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let window = self.policy.reset_window;

        let record = entries
            .entry(endpoint.to_string())
            .and_modify(|record| {
                if now.saturating_duration_since(record.first_failure_at) >= window {
                    record.first_failure_at = now;
                    record.consecutive_failures = 0;
                }
                record.consecutive_failures += 1;
                record.last_failure_at = now;
            })
            .or_insert(FailureRecord {
                first_failure_at: now,
                last_failure_at: now,
                consecutive_failures: 1,
            });

        record.consecutive_failures
    }

    pub fn record_success(&self, endpoint: &str) {
        lock(&self.entries).remove(endpoint);
    }

    pub fn failures(&self, endpoint: &str) -> u32 {
        lock(&self.entries)
            .get(endpoint)
            .map_or(0, |record| record.consecutive_failures)
    }

    pub fn record(&self, endpoint: &str) -> Option<FailureRecord> {
        lock(&self.entries).get(endpoint).copied()
    }
}

pub type SharedResponse = Shared<BoxFuture<'static, Result<ApiResponse, ApiError>>>;

#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<String, SharedResponse>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending request for `fingerprint`, or start one with `start`.
    /// Lookup and insert happen under a single lock so two callers can never
    /// both start. The guard handed to `start` must be moved into the request
    /// future: dropping it is what removes the entry again.
    pub fn join_or_start<F>(self: &Arc<Self>, fingerprint: &str, start: F) -> (SharedResponse, bool)
    where
        F: FnOnce(InFlightGuard) -> SharedResponse,
    {
        let mut entries = lock(&self.entries);
        if let Some(pending) = entries.get(fingerprint) {
            return (pending.clone(), false);
        }

        let guard = InFlightGuard {
            registry: Arc::downgrade(self),
            fingerprint: fingerprint.to_string(),
        };
        let pending = start(guard);
        entries.insert(fingerprint.to_string(), pending.clone());
        (pending, true)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        lock(&self.entries).contains_key(fingerprint)
    }
}

/// Removes its fingerprint from the registry when dropped, whether the
/// request settled normally or panicked.
pub struct InFlightGuard {
    registry: std::sync::Weak<InFlightRegistry>,
    fingerprint: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry.entries).remove(&self.fingerprint);
        }
    }
}
