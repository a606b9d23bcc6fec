//! Authenticated HTTP session against the Rocket.Chat REST API.
//!
//! One [`Session`] per connector. It owns the `reqwest` connection pool and
//! stamps every request with the `X-Auth-Token` / `X-User-Id` headers. The
//! poll task and `respond` share it through an `Arc`.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::auth::{Credentials, Identity};
use super::RocketChatError;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header carrying the personal access token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header carrying the token owner's user id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Connection pool plus auth state for one Rocket.Chat account.
pub struct Session {
    /// `None` once closed.
    http: RwLock<Option<reqwest::Client>>,
    api_root: String,
    token: String,
    user_id: String,
    identity: RwLock<Option<Identity>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("api_root", &self.api_root)
            .field("token", &"__REDACTED__")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an unauthenticated session for the given credentials.
    pub fn new(credentials: &Credentials) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            http: RwLock::new(Some(client)),
            api_root: credentials.api_root.clone(),
            token: credentials.token.clone(),
            user_id: credentials.user_id.clone(),
            identity: RwLock::new(None),
        }
    }

    /// Full URL of a REST method, e.g. `{api_root}/chat.postMessage`.
    pub fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_root)
    }

    /// The token sent in `X-Auth-Token`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The user id sent in `X-User-Id`.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn client(&self) -> Result<reqwest::Client, RocketChatError> {
        self.http
            .read()
            .await
            .clone()
            .ok_or(RocketChatError::SessionClosed)
    }

    /// Authenticated GET. The status is left for the caller to interpret.
    pub async fn get(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, RocketChatError> {
        let client = self.client().await?;
        let url = self.url(method);
        debug!(%url, "GET");
        let resp = client
            .get(&url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(USER_ID_HEADER, &self.user_id)
            .query(query)
            .send()
            .await?;
        Ok(resp)
    }

    /// Authenticated JSON POST. The status is left for the caller to interpret.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<reqwest::Response, RocketChatError> {
        let client = self.client().await?;
        let url = self.url(method);
        debug!(%url, "POST");
        let resp = client
            .post(&url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(USER_ID_HEADER, &self.user_id)
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }

    /// Record the identity confirmed by the login handshake.
    pub async fn set_identity(&self, identity: Identity) {
        *self.identity.write().await = Some(identity);
    }

    /// Identity confirmed by login, if any.
    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    /// Drop the connection pool. Returns `true` only for the call that
    /// actually closed it.
    pub async fn close(&self) -> bool {
        let closed = self.http.write().await.take().is_some();
        if closed {
            *self.identity.write().await = None;
            debug!("Rocket.Chat session closed");
        }
        closed
    }

    /// Whether [`Session::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.http.read().await.is_none()
    }
}
