use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, LedgerBackend};
use crate::config::StoreConfig;
use crate::models::{GroupTotal, Period};

use super::{CacheEntry, FetchOutcome};

#[derive(Debug, Clone)]
pub struct StampedTotal {
    pub total: GroupTotal,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Totals {
    pub entries: HashMap<Period, StampedTotal>,
    in_flight: HashSet<Period>,
}

/// The user's spend across all groups, cached per (month, year, currency).
///
/// Follows the same policy as the collection stores, except that freshness
/// and the in-progress check are tracked per period.
pub struct GroupTotalsStore {
    ttl: Duration,
    timeout: StdDuration,
    state: watch::Sender<CacheEntry<Totals>>,
    backend: Arc<dyn LedgerBackend>,
}

impl GroupTotalsStore {
    pub fn new(backend: Arc<dyn LedgerBackend>, config: &StoreConfig) -> Self {
        let (state, _) = watch::channel(CacheEntry::default());
        Self {
            ttl: config.group_totals_ttl(),
            timeout: config.fetch_timeout(),
            state,
            backend,
        }
    }

    pub async fn fetch(&self, user_id: &str, period: &Period, force_refresh: bool) -> FetchOutcome {
        let mut plan = None;
        let mut epoch = 0;
        self.state.send_if_modified(|entry| {
            let mut force = force_refresh;
            let mut changed = false;
            if !entry.belongs_to(user_id) {
                entry.reset(Some(user_id));
                force = true;
                changed = true;
            }

            let fresh = entry
                .data
                .entries
                .get(period)
                .map(|t| Utc::now() - t.fetched_at <= self.ttl)
                .unwrap_or(false);
            if !force && fresh {
                plan = Some(FetchOutcome::Cached);
            } else if entry.data.in_flight.contains(period) {
                plan = Some(FetchOutcome::InProgress);
            } else {
                entry.data.in_flight.insert(period.clone());
                entry.loading = true;
                epoch = entry.epoch();
                changed = true;
            }
            changed
        });
        if let Some(outcome) = plan {
            debug!(period = %period.label(), ?outcome, "Group totals not fetched");
            return outcome;
        }

        info!(period = %period.label(), "Fetching group totals");
        let result = match tokio::time::timeout(self.timeout, self.backend.group_totals(period)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.timeout)),
        };

        let mut outcome = FetchOutcome::Discarded;
        self.state.send_if_modified(|entry| {
            if entry.epoch() != epoch {
                return false;
            }
            entry.data.in_flight.remove(period);
            entry.loading = !entry.data.in_flight.is_empty();
            match result {
                Ok(total) => {
                    let now = Utc::now();
                    outcome = FetchOutcome::Fetched(total.groups.len());
                    entry.data.entries.insert(
                        period.clone(),
                        StampedTotal {
                            total,
                            fetched_at: now,
                        },
                    );
                    entry.fetched_at = Some(now);
                    entry.error = None;
                }
                Err(e) => {
                    warn!(period = %period.label(), error = %e, "Group totals fetch failed");
                    outcome = FetchOutcome::Failed(e.to_string());
                    entry.error = Some(e.to_string());
                }
            }
            true
        });
        outcome
    }

    /// Cached total for `period`, even if stale.
    pub fn total(&self, period: &Period) -> Option<GroupTotal> {
        self.state
            .borrow()
            .data
            .entries
            .get(period)
            .map(|t| t.total.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheEntry<Totals>> {
        self.state.subscribe()
    }

    pub fn clear(&self) {
        self.state.send_modify(|entry| entry.reset(None));
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        self.state.send_modify(|entry| {
            for t in entry.data.entries.values_mut() {
                t.fetched_at -= by;
            }
        });
    }
}
