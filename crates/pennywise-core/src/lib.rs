//! Pennywise core - expense tracking against a hosted backend.
//!
//! This crate holds everything except presentation: the REST client and auth
//! session, the per-user entity caches, request de-duplication and prefetch,
//! the data-sync coordinator, group services, balance computation and
//! currency formatting.

pub mod api;
pub mod auth;
pub mod balance;
pub mod cache;
pub mod config;
pub mod context;
pub mod groups;
pub mod limits;
pub mod models;
pub mod notifications;
pub mod notify;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{SessionData, SessionManager};
pub use config::{Config, StoreConfig};
pub use context::AppContext;
pub use notify::{LogNotifier, NoticeLevel, Notifier};
