//! In-memory presence cache
//!
//! Answers "is anyone watching this function?" without touching the store.
//! A background poller rebuilds the whole snapshot from the store on every
//! cycle and swaps it in at once; readers always see the last complete
//! snapshot. Staleness is bounded by the poll interval (plus backoff while
//! the store is failing).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::broker::topic::PresenceKey;
use crate::config::PresenceSettings;
use crate::presence::store::{PresenceRecord, PresenceStore, StoreError};

type Snapshot = Arc<HashMap<String, i64>>;

#[derive(Debug)]
pub struct PresenceCache {
    enabled: bool,
    snapshot: RwLock<Snapshot>,
}

impl PresenceCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// A cache for deployments with real-time logging switched off.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_logging_enabled(
        &self,
        subscription_id: &str,
        boundary_id: &str,
        function_id: &str,
    ) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.is_logging_enabled_at(now, subscription_id, boundary_id, function_id)
    }

    /// True when a live record exists for the function or its whole boundary.
    pub fn is_logging_enabled_at(
        &self,
        now_epoch: i64,
        subscription_id: &str,
        boundary_id: &str,
        function_id: &str,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let (Ok(boundary_key), Ok(function_key)) = (
            PresenceKey::for_boundary(subscription_id, boundary_id),
            PresenceKey::for_function(subscription_id, boundary_id, function_id),
        ) else {
            return false;
        };

        let snapshot = self.snapshot();
        let boundary_ttl = snapshot.get(boundary_key.as_str()).copied();
        let function_ttl = snapshot.get(function_key.as_str()).copied();
        boundary_ttl.max(function_ttl).is_some_and(|ttl| ttl >= now_epoch)
    }

    /// Swaps in a snapshot built from `records`, discarding the previous one.
    pub fn replace(&self, records: Vec<PresenceRecord>) {
        let next: HashMap<String, i64> = records
            .into_iter()
            .map(|r| (r.key.as_str().to_string(), r.ttl_epoch_seconds))
            .collect();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Runs one poll cycle. The snapshot is only replaced on success.
    pub fn poll_once(&self, store: &dyn PresenceStore) -> Result<usize, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let records = store.live_records(now)?;
        let count = records.len();
        self.replace(records);
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Poll delay schedule: grows by `factor` after each failure up to `max`,
/// snaps back to `base` after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        // a zero base would turn the poller into a busy loop
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            factor: factor.max(1.0),
            current: base,
        }
    }

    pub fn from_settings(settings: &PresenceSettings) -> Self {
        Self::new(
            settings.poll_interval(),
            settings.max_poll_interval(),
            settings.backoff_factor,
        )
    }

    pub fn on_success(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }

    pub fn on_failure(&mut self) -> Duration {
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .unwrap_or(self.max);
        self.current = next.min(self.max);
        self.current
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Starts the background poller, or returns `None` when presence is
/// disabled. The first poll happens immediately.
pub fn spawn_poller(
    cache: Arc<PresenceCache>,
    store: Arc<dyn PresenceStore>,
    settings: &PresenceSettings,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !cache.is_enabled() {
        return None;
    }
    let mut backoff = Backoff::from_settings(settings);

    Some(tokio::spawn(async move {
        loop {
            let delay = match cache.poll_once(store.as_ref()) {
                Ok(count) => {
                    debug!(records = count, "presence cache refreshed");
                    backoff.on_success()
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    error!(error = %e, retry_in = ?delay, "unable to poll presence store");
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }))
}
