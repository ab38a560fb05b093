//! REST API client module for the hosted backend.
//!
//! This module provides the `ApiClient` for the backend's table, auth, RPC
//! and edge-function endpoints, and the `LedgerBackend` / `GroupBackend`
//! traits the stores and services are written against.
//!
//! Requests carry the project's anon key and, once signed in, the session's
//! bearer token.

pub mod backend;
pub mod client;
pub mod error;

pub use backend::{GroupBackend, LedgerBackend, NotificationFilter};
pub use client::ApiClient;
pub use error::ApiError;
