//! Authentication module for managing user sessions.
//!
//! This module provides:
//! - `SessionData`: the bearer-token session issued by the auth endpoint
//! - `SessionManager`: sign-up / sign-in / sign-out, on-disk persistence, and
//!   the auth-state channel every other component follows
//!
//! Access tokens expire after the lifetime the backend reports; sessions are
//! refreshed shortly before that.

pub mod session;

pub use session::{SessionData, SessionManager};
