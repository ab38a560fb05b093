use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::ApiError;

/// Result shared by every caller of one request. The error is behind an `Arc`
/// because the shared future hands each waiter its own clone.
pub type SharedResult<T> = Result<T, Arc<ApiError>>;

type Pending<T> = Shared<BoxFuture<'static, SharedResult<T>>>;

/// Single-flight request queue.
///
/// Concurrent callers asking for the same key share one execution of the
/// producer. The producer runs on its own task, so it finishes even if every
/// caller goes away, and the key is released when that task ends.
pub struct RequestQueue<T> {
    in_flight: Arc<DashMap<String, (u64, Pending<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

/// Removes the key once the producer task ends, panics included. The id check
/// keeps a later request under the same key in place.
struct Release<T> {
    in_flight: Arc<DashMap<String, (u64, Pending<T>)>>,
    key: String,
    id: u64,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        self.in_flight.remove_if(&self.key, |_, (id, _)| *id == self.id);
    }
}

impl<T> RequestQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` for `key`, or join the run already in flight.
    ///
    /// `producer` is only called when no request for `key` is pending.
    pub async fn enqueue<F, Fut>(&self, key: &str, producer: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (pending, start) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!(key = key, "Joining in-flight request");
                (entry.get().1.clone(), None)
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<Result<T, ApiError>>();
                let owned_key = key.to_string();
                let pending = async move {
                    match rx.await {
                        Ok(result) => result.map_err(Arc::new),
                        Err(_) => {
                            warn!(key = %owned_key, "Request task ended without a result");
                            Err(Arc::new(ApiError::TaskFailed(format!(
                                "request for {} did not complete",
                                owned_key
                            ))))
                        }
                    }
                }
                .boxed()
                .shared();
                slot.insert((id, pending.clone()));
                (pending, Some((id, tx)))
            }
        };

        // The map entry is released by now, so the producer may use this queue.
        if let Some((id, tx)) = start {
            let release = Release {
                in_flight: Arc::clone(&self.in_flight),
                key: key.to_string(),
                id,
            };
            let work = producer();
            tokio::spawn(async move {
                let _release = release;
                // Nobody listening is fine; the result is simply dropped.
                let _ = tx.send(work.await);
            });
        }
        pending.await
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }
}
