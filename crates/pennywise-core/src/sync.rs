//! Coordinated loading of the category and expense stores.
//!
//! `DataSync` follows the signed-in user: on a new user both stores are
//! fetched in parallel, on sign-out both are cleared. Screens only need to ask
//! [`DataSync::is_loading`] and read the stores.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::SessionData;
use crate::cache::{CategoryStore, ExpenseStore, FetchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// User the coordinator is currently following.
    pub user_id: Option<String>,
    /// User whose data was last loaded.
    pub synced_user: Option<String>,
    pub last_error: Option<String>,
    active: usize,
    /// Bumped by every clear; a sync started before a clear must not write.
    generation: u64,
}

/// A sync in which at least one store failed to load. The stores keep their
/// previous data and record the error themselves.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("Failed to load {store}: {message}")]
    Store {
        store: &'static str,
        message: String,
    },

    #[error("Failed to load categories ({categories}) and expenses ({expenses})")]
    Both { categories: String, expenses: String },
}

pub struct DataSync {
    categories: Arc<CategoryStore>,
    expenses: Arc<ExpenseStore>,
    state: watch::Sender<SyncState>,
}

impl DataSync {
    pub fn new(categories: Arc<CategoryStore>, expenses: Arc<ExpenseStore>) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            categories,
            expenses,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// True while a sync runs or either store is loading.
    pub fn is_loading(&self) -> bool {
        self.state.borrow().active > 0 || self.categories.is_loading() || self.expenses.is_loading()
    }

    /// React to a sign-in, user switch or sign-out.
    ///
    /// A user that is already synced is left alone; the stores revalidate on
    /// their own TTLs. The clear generation is taken when this is called, not
    /// when the future is first polled, so a sign-out handled in between wins.
    pub fn on_user_changed<'a>(
        &'a self,
        user_id: Option<&'a str>,
    ) -> impl Future<Output = Result<(), SyncError>> + Send + 'a {
        let generation = self.generation();
        async move {
            match user_id {
                None => {
                    self.clear_data();
                    Ok(())
                }
                Some(user_id) => self.follow(user_id, generation).await,
            }
        }
    }

    /// Load both stores for the followed user. `force_refresh` bypasses their
    /// TTLs, which is what callers want after a mutation elsewhere.
    pub fn sync_data(
        &self,
        force_refresh: bool,
    ) -> impl Future<Output = Result<(), SyncError>> + Send + '_ {
        let generation = self.generation();
        self.sync_at(force_refresh, generation)
    }

    fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    async fn follow(&self, user_id: &str, generation: u64) -> Result<(), SyncError> {
        let mut stale = false;
        let mut already_synced = false;
        self.state.send_if_modified(|state| {
            if state.generation != generation {
                stale = true;
                return false;
            }
            already_synced = state.synced_user.as_deref() == Some(user_id);
            if state.user_id.as_deref() == Some(user_id) {
                return false;
            }
            state.user_id = Some(user_id.to_string());
            true
        });
        if stale {
            debug!(user_id = user_id, "Data cleared before sync started, skipped");
            return Ok(());
        }
        if already_synced {
            debug!(user_id = user_id, "User already synced");
            return Ok(());
        }
        self.sync_at(false, generation).await
    }

    async fn sync_at(&self, force_refresh: bool, generation: u64) -> Result<(), SyncError> {
        let (followed, current) = {
            let state = self.state.borrow();
            (state.user_id.clone(), state.generation)
        };
        if current != generation {
            debug!("Data cleared before sync started, skipped");
            return Ok(());
        }
        let Some(user_id) = followed else {
            self.clear_data();
            return Ok(());
        };

        info!(user_id = %user_id, force = force_refresh, "Syncing data");
        self.state.send_modify(|state| {
            state.active += 1;
            state.phase = SyncPhase::Syncing;
        });

        let (categories, expenses) = tokio::join!(
            self.categories.fetch(&user_id, force_refresh),
            self.expenses.fetch(&user_id, force_refresh),
        );
        let result = combine(&categories, &expenses);

        self.state.send_modify(|state| {
            state.active = state.active.saturating_sub(1);
            if state.active == 0 {
                state.phase = SyncPhase::Idle;
            }
            if state.generation != generation || state.user_id.as_deref() != Some(user_id.as_str()) {
                debug!(user_id = %user_id, "User changed during sync, result dropped");
                return;
            }
            state.synced_user = Some(user_id.clone());
            state.last_error = result.as_ref().err().map(ToString::to_string);
        });

        match &result {
            Ok(()) => info!(user_id = %user_id, "Sync complete"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Sync finished with errors"),
        }
        result
    }

    /// Drop both stores' data and forget the synced user.
    pub fn clear_data(&self) {
        info!("Clearing synced data");
        self.categories.clear();
        self.expenses.clear();
        self.state.send_modify(|state| {
            state.user_id = None;
            state.synced_user = None;
            state.last_error = None;
            state.generation += 1;
        });
    }

    /// Follow an auth-state channel until it closes.
    ///
    /// Each sync runs on its own task so a sign-out is handled immediately
    /// instead of after the running fetches.
    pub async fn run(self: Arc<Self>, mut auth_rx: watch::Receiver<Option<SessionData>>) {
        let mut followed: Option<Option<String>> = None;
        loop {
            let user_id = auth_rx.borrow_and_update().as_ref().map(|s| s.user_id.clone());
            if followed.as_ref() != Some(&user_id) {
                followed = Some(user_id.clone());
                match user_id {
                    None => self.clear_data(),
                    Some(id) => {
                        let this = Arc::clone(&self);
                        let generation = self.generation();
                        tokio::spawn(async move {
                            // Errors are already logged and stored.
                            let _ = this.follow(&id, generation).await;
                        });
                    }
                }
            }
            if auth_rx.changed().await.is_err() {
                debug!("Auth channel closed, sync stopped");
                break;
            }
        }
    }
}

fn combine(categories: &FetchOutcome, expenses: &FetchOutcome) -> Result<(), SyncError> {
    match (categories.error(), expenses.error()) {
        (None, None) => Ok(()),
        (Some(c), None) => Err(SyncError::Store {
            store: "categories",
            message: c.to_string(),
        }),
        (None, Some(e)) => Err(SyncError::Store {
            store: "expenses",
            message: e.to_string(),
        }),
        (Some(c), Some(e)) => Err(SyncError::Both {
            categories: c.to_string(),
            expenses: e.to_string(),
        }),
    }
}
