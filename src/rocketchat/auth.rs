//! Credential validation and the `/me` login handshake.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use super::session::Session;
use super::RocketChatError;
use crate::config::ConnectorConfig;

/// Longest server error message carried into [`RocketChatError::Auth`].
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Validated connector settings.
///
/// Built once at connector construction; a connector that cannot build one
/// stays inert.
#[derive(Clone)]
pub struct Credentials {
    /// Connector display name.
    pub name: String,
    /// Personal access token.
    pub token: String,
    /// Owner of the token.
    pub user_id: String,
    /// Room polled and used for untargeted replies.
    pub default_target: String,
    /// Private group polled instead of `default_target`.
    pub group: Option<String>,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// REST API root without trailing slash.
    pub api_root: String,
    /// Alias for outbound messages.
    pub bot_name: Option<String>,
    /// History page size.
    pub page_size: u32,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("token", &"__REDACTED__")
            .field("user_id", &self.user_id)
            .field("default_target", &self.default_target)
            .field("group", &self.group)
            .field("poll_interval", &self.poll_interval)
            .field("api_root", &self.api_root)
            .field("bot_name", &self.bot_name)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Credentials {
    /// Validate the connector table of the config.
    ///
    /// # Errors
    ///
    /// [`RocketChatError::MissingCredential`] when `token` or `user-id` is
    /// absent or blank, [`RocketChatError::InvalidApiRoot`] when `api-root`
    /// is not an http(s) URL.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, RocketChatError> {
        let token = non_blank(config.token.as_deref())
            .ok_or(RocketChatError::MissingCredential("token"))?;
        let user_id = non_blank(config.user_id.as_deref())
            .ok_or(RocketChatError::MissingCredential("user-id"))?;
        let api_root = validate_api_root(&config.api_root)?;

        Ok(Self {
            name: config.name.clone(),
            token: token.to_owned(),
            user_id: user_id.to_owned(),
            default_target: config.default_target.clone(),
            group: non_blank(config.group.as_deref()).map(str::to_owned),
            poll_interval: config.poll_interval(),
            api_root,
            bot_name: non_blank(config.bot_name.as_deref()).map(str::to_owned),
            page_size: config.page_size.max(1),
        })
    }

    /// Room the poll loop reads: the private group if set, else the default target.
    pub fn poll_room(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.default_target)
    }

    /// History method matching [`Credentials::poll_room`].
    pub fn history_method(&self) -> &'static str {
        if self.group.is_some() {
            "groups.history"
        } else {
            "channels.history"
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_api_root(raw: &str) -> Result<String, RocketChatError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = url::Url::parse(trimmed).map_err(|e| RocketChatError::InvalidApiRoot {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RocketChatError::InvalidApiRoot {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(trimmed.to_owned())
}

/// Account the session is logged in as.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Rocket.Chat user id.
    pub user_id: String,
    /// Login name.
    pub username: String,
    /// Token the session authenticates with.
    pub auth_token: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("auth_token", &"__REDACTED__")
            .finish()
    }
}

/// Body of `GET /me` (subset).
#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(rename = "_id")]
    id: String,
    username: String,
}

/// Error body returned by Rocket.Chat on failures.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Perform the login handshake and store the identity in `session`.
///
/// No retry; a supervisor decides whether to call again.
///
/// # Errors
///
/// [`RocketChatError::Auth`] on any non-200 status,
/// [`RocketChatError::Transport`] when the request or body decode fails.
pub async fn login(session: &Session) -> Result<Identity, RocketChatError> {
    let resp = session.get("me", &[]).await?;
    let status = resp.status();
    if status != StatusCode::OK {
        let message = error_message(resp).await;
        return Err(RocketChatError::Auth { status, message });
    }

    let me: MeResponse = resp.json().await?;
    let identity = Identity {
        user_id: me.id,
        username: me.username,
        auth_token: session.token().to_owned(),
    };
    session.set_identity(identity.clone()).await;
    Ok(identity)
}

/// Best-effort extraction of a human-readable reason from an error response.
pub(crate) async fn error_message(resp: reqwest::Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body.message.or(body.error).unwrap_or(text);
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
