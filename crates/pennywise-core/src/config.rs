//! Application configuration management.
//!
//! The persisted part is small: backend location, the theme preference and the
//! last email used to sign in. It is stored at
//! `~/.config/pennywise/config.json`. Cache lifetimes and timeouts are not
//! persisted; [`StoreConfig`] carries them in memory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "pennywise";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    #[serde(default)]
    pub theme: Theme,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the session file and logs.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Overlay values from the environment (`PENNYWISE_URL`,
    /// `PENNYWISE_ANON_KEY`). Empty variables are ignored.
    pub fn apply_env(&mut self) {
        if let Some(url) = non_empty_var("PENNYWISE_URL") {
            self.backend_url = Some(url);
        }
        if let Some(key) = non_empty_var("PENNYWISE_ANON_KEY") {
            self.anon_key = Some(key);
        }
    }

    /// Backend URL and anon key, or an error naming what is missing.
    pub fn backend(&self) -> Result<(&str, &str)> {
        let url = self
            .backend_url
            .as_deref()
            .context("No backend URL configured (set PENNYWISE_URL)")?;
        let key = self
            .anon_key
            .as_deref()
            .context("No anon key configured (set PENNYWISE_ANON_KEY)")?;
        Ok((url, key))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Cache lifetimes and the fetch timeout shared by the stores.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub categories_ttl: Duration,
    pub expenses_ttl: Duration,
    pub group_totals_ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            categories_ttl: Duration::from_secs(5 * 60),
            expenses_ttl: Duration::from_secs(2 * 60),
            group_totals_ttl: Duration::from_secs(5 * 60),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

impl StoreConfig {
    pub fn categories_ttl(&self) -> chrono::Duration {
        to_chrono(self.categories_ttl)
    }

    pub fn expenses_ttl(&self) -> chrono::Duration {
        to_chrono(self.expenses_ttl)
    }

    pub fn group_totals_ttl(&self) -> chrono::Duration {
        to_chrono(self.group_totals_ttl)
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("pennywise-config-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);
        let config = Config {
            backend_url: Some("https://abc.example.co".to_string()),
            anon_key: Some("anon".to_string()),
            theme: Theme::Dark,
            last_email: Some("a@example.com".to_string()),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.theme, Theme::Dark);
        assert_eq!(loaded.last_email.as_deref(), Some("a@example.com"));
        assert_eq!(loaded.backend().unwrap(), ("https://abc.example.co", "anon"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("pennywise-does-not-exist.json");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.theme, Theme::Light);
        assert!(config.backend().is_err());
    }

    #[test]
    fn test_theme_defaults_when_absent() {
        let config: Config = serde_json::from_str(r#"{"last_email":null}"#).unwrap();
        assert_eq!(config.theme, Theme::Light);
    }

    #[test]
    fn test_store_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.categories_ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.expenses_ttl(), chrono::Duration::minutes(2));
        assert_eq!(config.group_totals_ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(15));
    }
}
