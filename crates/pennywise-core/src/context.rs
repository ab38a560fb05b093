//! Application context: one instance of every store and service, wired
//! together and shared by `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError, GroupBackend, LedgerBackend};
use crate::auth::{SessionData, SessionManager};
use crate::cache::{CategoryStore, ExpenseStore, GroupTotalsStore};
use crate::config::{Config, StoreConfig};
use crate::groups::GroupService;
use crate::limits::LimitService;
use crate::notifications::NotificationService;
use crate::notify::Notifier;
use crate::sync::DataSync;

pub struct AppContext {
    pub api: Arc<ApiClient>,
    pub session: Arc<SessionManager>,
    pub categories: Arc<CategoryStore>,
    pub expenses: Arc<ExpenseStore>,
    pub group_totals: Arc<GroupTotalsStore>,
    pub sync: Arc<DataSync>,
    pub groups: GroupService,
    pub notifications: NotificationService,
    pub limits: LimitService,
}

impl AppContext {
    /// Build a context talking to the backend named in `config`.
    pub fn new(config: &Config, stores: &StoreConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let (url, anon_key) = config.backend()?;
        let cache_dir = Config::cache_dir()?;
        let session = Arc::new(SessionManager::new(cache_dir));
        let api = ApiClient::new(url, anon_key)
            .context("Failed to create HTTP client")?
            .with_session(session.subscribe());
        let api = Arc::new(api);
        let ledger: Arc<dyn LedgerBackend> = api.clone();
        let group_backend: Arc<dyn GroupBackend> = api.clone();
        Ok(Self::from_parts(api, ledger, group_backend, session, stores, notifier))
    }

    /// Assemble a context from explicit backends.
    pub fn from_parts(
        api: Arc<ApiClient>,
        ledger: Arc<dyn LedgerBackend>,
        group_backend: Arc<dyn GroupBackend>,
        session: Arc<SessionManager>,
        stores: &StoreConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let categories = Arc::new(CategoryStore::new(
            Arc::clone(&ledger),
            Arc::clone(&notifier),
            stores,
        ));
        let expenses = Arc::new(ExpenseStore::new(
            Arc::clone(&ledger),
            Arc::clone(&notifier),
            stores,
        ));
        let group_totals = Arc::new(GroupTotalsStore::new(Arc::clone(&ledger), stores));
        let sync = Arc::new(DataSync::new(Arc::clone(&categories), Arc::clone(&expenses)));

        Self {
            groups: GroupService::new(Arc::clone(&group_backend), Arc::clone(&notifier))
                .with_session(session.subscribe()),
            notifications: NotificationService::new(group_backend, Arc::clone(&notifier)),
            limits: LimitService::new(ledger, Arc::clone(&expenses), notifier),
            api,
            session,
            categories,
            expenses,
            group_totals,
            sync,
        }
    }

    /// Start following auth-state changes. The task ends when the session
    /// manager is dropped.
    pub fn spawn_sync(&self) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.sync).run(self.session.subscribe()))
    }

    /// Restore the stored session, refreshing it if it is about to expire.
    pub async fn restore_session(&self) -> Result<Option<SessionData>> {
        if let Err(e) = self.session.load() {
            warn!(error = %e, "Ignoring unreadable session file");
        }
        let usable = self
            .session
            .refresh_if_needed(&self.api)
            .await
            .context("Failed to refresh session")?;
        Ok(if usable { self.session.current() } else { None })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionData, ApiError> {
        self.session.sign_in(&self.api, email, password).await
    }

    pub async fn sign_out(&self) {
        self.session.sign_out(&self.api).await;
        self.reset();
    }

    /// Forget every cached piece of user data.
    pub fn reset(&self) {
        info!("Resetting application data");
        self.sync.clear_data();
        self.group_totals.clear();
        self.groups.clear_cache();
    }

    pub fn log_dir() -> Result<PathBuf> {
        Ok(Config::cache_dir()?.join("logs"))
    }
}
