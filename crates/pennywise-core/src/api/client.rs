//! API client for the hosted backend.
//!
//! This module provides the `ApiClient` struct for the three surfaces the
//! backend exposes: the row-oriented REST interface over named tables, the
//! auth endpoints, and authenticated RPC / edge-function calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::SessionData;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// The stores race their own, shorter timeout; this is the transport ceiling.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const REST_PATH: &str = "rest/v1";
const AUTH_PATH: &str = "auth/v1";
const FUNCTIONS_PATH: &str = "functions/v1";

/// Filter list for REST queries, e.g. `[("user_id", eq("u1"))]`.
pub type Filters<'a> = &'a [(&'a str, String)];

/// Build an equality filter value for the REST query string.
pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Build an `in` filter value for the REST query string.
pub fn in_list<S: AsRef<str>>(values: &[S]) -> String {
    let joined: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
    format!("in.({})", joined.join(","))
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// API client for the hosted backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    anon_key: Arc<str>,
    session: Option<watch::Receiver<Option<SessionData>>>,
}

impl ApiClient {
    /// Create a new API client for the project at `base_url`.
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            anon_key: Arc::from(anon_key),
            session: None,
        })
    }

    /// Create a client that authenticates with whatever session the receiver
    /// currently holds, sharing the connection pool.
    pub fn with_session(&self, session: watch::Receiver<Option<SessionData>>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            anon_key: Arc::clone(&self.anon_key),
            session: Some(session),
        }
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|rx| rx.borrow().as_ref().map(|s| s.access_token.clone()))
    }

    /// The signed-in user's id, if any.
    pub fn current_user_id(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|rx| rx.borrow().as_ref().map(|s| s.user_id.clone()))
    }

    fn url(&self, path: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, path, name)
    }

    fn auth_headers(&self, token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&self.anon_key)
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid anon key: {}", e)))?;
        headers.insert("apikey", key);

        let bearer = token.unwrap_or(&self.anon_key);
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|e| ApiError::InvalidResponse(format!("Invalid token: {}", e)))?,
        );
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request built by `build`, retrying on 429 with exponential backoff.
    async fn execute<F>(&self, url: &str, build: F) -> Result<reqwest::Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let headers = self.auth_headers(self.access_token().as_deref())?;

        loop {
            let response = build(&self.client).headers(headers.clone()).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn parse<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    /// Take the single row of a `return=representation` response.
    fn single<T>(url: &str, mut rows: Vec<T>) -> Result<T, ApiError> {
        if rows.is_empty() {
            return Err(ApiError::NotFound(format!("No row returned from {}", url)));
        }
        Ok(rows.swap_remove(0))
    }

    // =========================================================================
    // REST tables
    // =========================================================================

    /// Select rows from `table`, optionally ordered by `order` (e.g. `"date.desc"`).
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: Filters<'_>,
        order: Option<&str>,
    ) -> Result<Vec<T>, ApiError> {
        let url = self.url(REST_PATH, table);
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().cloned());
        if let Some(order) = order {
            query.push(("order", order.to_string()));
        }

        let response = self
            .execute(&url, |c| c.get(&url).query(&query))
            .await?;
        let rows: Vec<T> = Self::parse(&url, response).await?;
        debug!(table = table, rows = rows.len(), "Selected rows");
        Ok(rows)
    }

    pub async fn insert<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(REST_PATH, table);
        let response = self
            .execute(&url, |c| {
                c.post(&url)
                    .header("Prefer", "return=representation")
                    .json(body)
            })
            .await?;
        let rows: Vec<T> = Self::parse(&url, response).await?;
        Self::single(&url, rows)
    }

    /// Patch every row matching `filters` and return the updated rows.
    pub async fn update<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        table: &str,
        filters: Filters<'_>,
        body: &B,
    ) -> Result<Vec<T>, ApiError> {
        let url = self.url(REST_PATH, table);
        let response = self
            .execute(&url, |c| {
                c.request(Method::PATCH, &url)
                    .query(filters)
                    .header("Prefer", "return=representation")
                    .json(body)
            })
            .await?;
        Self::parse(&url, response).await
    }

    pub async fn delete(&self, table: &str, filters: Filters<'_>) -> Result<(), ApiError> {
        let url = self.url(REST_PATH, table);
        self.execute(&url, |c| c.delete(&url).query(filters)).await?;
        Ok(())
    }

    /// Insert or merge on the columns named by `on_conflict`.
    pub async fn upsert<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        table: &str,
        body: &B,
        on_conflict: &str,
    ) -> Result<T, ApiError> {
        let url = self.url(REST_PATH, table);
        let response = self
            .execute(&url, |c| {
                c.post(&url)
                    .query(&[("on_conflict", on_conflict)])
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(body)
            })
            .await?;
        let rows: Vec<T> = Self::parse(&url, response).await?;
        Self::single(&url, rows)
    }

    // =========================================================================
    // RPC and edge functions
    // =========================================================================

    /// Call a server-side SQL function.
    pub async fn rpc<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        name: &str,
        args: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(&format!("{}/rpc", REST_PATH), name);
        let response = self.execute(&url, |c| c.post(&url).json(args)).await?;
        Self::parse(&url, response).await
    }

    /// Invoke an edge function. These always need a signed-in user.
    pub async fn invoke<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        function: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        if self.access_token().is_none() {
            return Err(ApiError::NotAuthenticated);
        }
        let url = self.url(FUNCTIONS_PATH, function);
        let response = self.execute(&url, |c| c.post(&url).json(body)).await?;
        Self::parse(&url, response).await
    }

    // =========================================================================
    // Auth
    // =========================================================================

    fn session_from(auth: AuthResponse) -> SessionData {
        let expires_at: DateTime<Utc> = Utc::now() + chrono::Duration::seconds(auth.expires_in);
        SessionData {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user_id: auth.user.id,
            email: auth.user.email.unwrap_or_default(),
            expires_at,
        }
    }

    /// Register a new account. Returns a session when the project does not
    /// require email confirmation.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<SessionData>, ApiError> {
        let url = self.url(AUTH_PATH, "signup");
        let body = PasswordCredentials { email, password };
        let response = self.execute(&url, |c| c.post(&url).json(&body)).await?;
        let value: serde_json::Value = Self::parse(&url, response).await?;

        if value.get("access_token").is_some() {
            let auth: AuthResponse = serde_json::from_value(value)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse sign-up response: {}", e)))?;
            Ok(Some(Self::session_from(auth)))
        } else {
            Ok(None)
        }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SessionData, ApiError> {
        let url = self.url(AUTH_PATH, "token");
        let body = PasswordCredentials { email, password };
        let response = self
            .execute(&url, |c| {
                c.post(&url).query(&[("grant_type", "password")]).json(&body)
            })
            .await?;
        let auth: AuthResponse = Self::parse(&url, response).await?;
        Ok(Self::session_from(auth))
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<SessionData, ApiError> {
        let url = self.url(AUTH_PATH, "token");
        let body = RefreshRequest { refresh_token };
        let response = self
            .execute(&url, |c| {
                c.post(&url)
                    .query(&[("grant_type", "refresh_token")])
                    .json(&body)
            })
            .await?;
        let auth: AuthResponse = Self::parse(&url, response).await?;
        Ok(Self::session_from(auth))
    }

    /// Id and email of the user behind the current access token.
    pub async fn get_user(&self) -> Result<(String, String), ApiError> {
        if self.access_token().is_none() {
            return Err(ApiError::NotAuthenticated);
        }
        let url = self.url(AUTH_PATH, "user");
        let response = self.execute(&url, |c| c.get(&url)).await?;
        let user: AuthUser = Self::parse(&url, response).await?;
        Ok((user.id, user.email.unwrap_or_default()))
    }

    /// Revoke the current session server-side.
    pub async fn sign_out(&self) -> Result<(), ApiError> {
        if self.access_token().is_none() {
            return Ok(());
        }
        let url = self.url(AUTH_PATH, "logout");
        self.execute(&url, |c| c.post(&url)).await?;
        Ok(())
    }
}
