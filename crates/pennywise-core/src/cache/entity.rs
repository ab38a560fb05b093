use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiError;

use super::CacheEntry;

/// What a call to [`EntityCache::fetch`] ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Served from cache, no request issued.
    Cached,
    /// Another fetch was already running; nothing issued.
    InProgress,
    /// Fetched and replaced the cache with this many items.
    Fetched(usize),
    /// The request failed; the message is also stored in the entry.
    Failed(String),
    /// The cache was cleared or switched user while the request ran; the
    /// response was dropped.
    Discarded,
}

impl FetchOutcome {
    pub fn error(&self) -> Option<&str> {
        match self {
            FetchOutcome::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn went_to_network(&self) -> bool {
        matches!(self, FetchOutcome::Fetched(_) | FetchOutcome::Failed(_))
    }
}

enum Plan {
    Serve,
    Skip,
    Load(u64),
}

/// A per-user, TTL-revalidated collection mirroring one backend table.
///
/// State lives in a watch channel so observers are woken on every change.
/// Every mutation of the entry happens inside one closure that never spans an
/// await, which makes the loading-flag check and set a single step.
pub struct EntityCache<T> {
    name: &'static str,
    ttl: Duration,
    timeout: StdDuration,
    state: watch::Sender<CacheEntry<Vec<T>>>,
}

impl<T> EntityCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration, timeout: StdDuration) -> Self {
        let (state, _) = watch::channel(CacheEntry::default());
        Self {
            name,
            ttl,
            timeout,
            state,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheEntry<Vec<T>>> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> CacheEntry<Vec<T>> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().data.clone()
    }

    /// Run `f` against the cached items without cloning them.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.state.borrow().data)
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    /// Load the collection for `user_id` unless the cache can serve it.
    ///
    /// A different user than the one cached discards the data and forces a
    /// load. Failures never escape: they are recorded in the entry and the
    /// previous data is kept.
    pub async fn fetch<F, Fut>(&self, user_id: &str, force_refresh: bool, load: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, ApiError>>,
    {
        let mut plan = Plan::Skip;
        self.state.send_if_modified(|entry| {
            let mut force = force_refresh;
            let mut changed = false;
            if !entry.belongs_to(user_id) {
                debug!(store = self.name, user_id = user_id, "User changed, discarding cache");
                entry.reset(Some(user_id));
                force = true;
                changed = true;
            }

            if !force && entry.is_fresh(self.ttl) {
                plan = Plan::Serve;
            } else if entry.loading {
                plan = Plan::Skip;
            } else {
                entry.loading = true;
                plan = Plan::Load(entry.epoch);
                changed = true;
            }
            changed
        });

        let epoch = match plan {
            Plan::Serve => {
                debug!(store = self.name, "Serving from cache");
                return FetchOutcome::Cached;
            }
            Plan::Skip => {
                debug!(store = self.name, "Fetch already in progress");
                return FetchOutcome::InProgress;
            }
            Plan::Load(epoch) => epoch,
        };

        info!(store = self.name, user_id = user_id, "Fetching");
        let result = match tokio::time::timeout(self.timeout, load()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.timeout)),
        };

        let mut outcome = FetchOutcome::Discarded;
        self.state.send_if_modified(|entry| {
            if entry.epoch != epoch {
                debug!(store = self.name, "Discarding response for a cleared cache");
                return false;
            }
            entry.loading = false;
            match result {
                Ok(items) => {
                    outcome = FetchOutcome::Fetched(items.len());
                    entry.data = items;
                    entry.fetched_at = Some(Utc::now());
                    entry.error = None;
                }
                Err(e) => {
                    warn!(store = self.name, error = %e, "Fetch failed");
                    let message = e.to_string();
                    outcome = FetchOutcome::Failed(message.clone());
                    entry.error = Some(message);
                }
            }
            true
        });
        outcome
    }

    /// Patch the cached items after a confirmed mutation, unless the cache was
    /// cleared or switched user since `epoch` was read.
    pub fn apply(&self, epoch: u64, f: impl FnOnce(&mut Vec<T>)) -> bool {
        self.state.send_if_modified(|entry| {
            if entry.epoch != epoch {
                return false;
            }
            f(&mut entry.data);
            true
        })
    }

    /// Drop all data and the user tag.
    pub fn clear(&self) {
        self.state.send_modify(|entry| entry.reset(None));
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        self.state.send_modify(|entry| {
            entry.fetched_at = entry.fetched_at.map(|at| at - by);
        });
    }
}
