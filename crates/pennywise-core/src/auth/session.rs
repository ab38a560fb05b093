use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        Utc::now() > self.expires_at - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_minutes().max(0)
    }
}

/// Owns the current session and publishes every change to subscribers.
///
/// A `None` on the channel means signed out.
pub struct SessionManager {
    cache_dir: PathBuf,
    state: watch::Sender<Option<SessionData>>,
}

impl SessionManager {
    pub fn new(cache_dir: PathBuf) -> Self {
        let (state, _) = watch::channel(None);
        Self { cache_dir, state }
    }

    /// Receiver for auth-state changes (sign-in, refresh, sign-out).
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionData>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<SessionData> {
        self.state.borrow().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().as_ref().map(|d| d.user_id.clone())
    }

    /// Check if session is valid (exists and not expired)
    pub fn is_valid(&self) -> bool {
        self.state
            .borrow()
            .as_ref()
            .map(|d| !d.is_expired())
            .unwrap_or(false)
    }

    /// Load session from disk. Expired sessions are kept on disk so their
    /// refresh token can still be used.
    pub fn load(&self) -> Result<bool> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        let usable = !data.is_expired();
        if usable {
            self.state.send_replace(Some(data));
        }
        Ok(usable)
    }

    /// Load the stored session even if expired, to refresh it.
    fn load_stored(&self) -> Option<SessionData> {
        let contents = std::fs::read_to_string(self.session_path()).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn remove_file(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Publish `data` and persist it; a persistence failure is logged only.
    pub fn update(&self, data: SessionData) {
        if let Err(e) = self.save(&data) {
            warn!(error = %e, "Failed to persist session");
        }
        self.state.send_replace(Some(data));
    }

    /// Drop the session locally and notify subscribers.
    pub fn clear(&self) {
        if let Err(e) = self.remove_file() {
            warn!(error = %e, "Failed to remove session file");
        }
        self.state.send_replace(None);
    }

    pub async fn sign_in(&self, api: &ApiClient, email: &str, password: &str) -> Result<SessionData, ApiError> {
        let data = api.sign_in_with_password(email, password).await?;
        info!(user_id = %data.user_id, "Signed in");
        self.update(data.clone());
        Ok(data)
    }

    /// Register and, when the backend hands back a session, sign in.
    pub async fn sign_up(&self, api: &ApiClient, email: &str, password: &str) -> Result<Option<SessionData>, ApiError> {
        let data = api.sign_up(email, password).await?;
        match data {
            Some(ref session) => {
                info!(user_id = %session.user_id, "Signed up and signed in");
                self.update(session.clone());
            }
            None => info!("Signed up, email confirmation pending"),
        }
        Ok(data)
    }

    /// Sign out server-side (best effort) and clear local state.
    pub async fn sign_out(&self, api: &ApiClient) {
        if let Err(e) = api.sign_out().await {
            warn!(error = %e, "Server-side sign-out failed, clearing local session anyway");
        }
        self.clear();
        info!("Signed out");
    }

    /// Refresh the session if it is close to expiry. Returns whether a usable
    /// session exists afterwards.
    pub async fn refresh_if_needed(&self, api: &ApiClient) -> Result<bool, ApiError> {
        let current = self.current().or_else(|| self.load_stored());
        let Some(data) = current else {
            return Ok(false);
        };
        if !data.needs_refresh() {
            if self.current().is_none() {
                self.state.send_replace(Some(data));
            }
            return Ok(true);
        }

        match api.refresh_session(&data.refresh_token).await {
            Ok(fresh) => {
                info!(user_id = %fresh.user_id, "Session refreshed");
                self.update(fresh);
                Ok(true)
            }
            Err(ApiError::Unauthorized) | Err(ApiError::InvalidResponse(_)) => {
                warn!("Refresh token rejected, signing out");
                self.clear();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}
