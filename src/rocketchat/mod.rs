//! Rocket.Chat connector: REST session, login, history polling and replies.
//!
//! Talks to a single Rocket.Chat server through its REST API. Inbound
//! messages are fetched by polling the room history since a watermark
//! timestamp; outbound messages go through `chat.postMessage`.

pub mod auth;
pub mod connector;
pub mod poll;
pub mod session;
pub mod translate;
pub mod watermark;

pub use auth::{Credentials, Identity};
pub use connector::{ConnectorState, Delivery, RocketChatConnector};
pub use watermark::Watermark;

use reqwest::StatusCode;

/// Errors from the Rocket.Chat connector.
#[derive(Debug, thiserror::Error)]
pub enum RocketChatError {
    /// A required credential is absent from the configuration.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The configured API root is not a usable URL.
    #[error("invalid api-root {url:?}: {reason}")]
    InvalidApiRoot {
        /// The configured value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The login handshake was refused.
    #[error("login rejected with status {status}: {message}")]
    Auth {
        /// HTTP status returned by `/me`.
        status: StatusCode,
        /// Server-provided reason, if any.
        message: String,
    },

    /// The history endpoint returned a non-success status.
    #[error("history poll failed with status {status}")]
    Poll {
        /// HTTP status returned by the history call.
        status: StatusCode,
    },

    /// Sending a message was refused.
    #[error("send rejected with status {status}")]
    Respond {
        /// HTTP status returned by `chat.postMessage`.
        status: StatusCode,
    },

    /// Network-level failure (connect, timeout, body decode).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The connector was built from unusable configuration.
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    /// The poll task panicked or was aborted.
    #[error("poll task failed: {0}")]
    TaskFailed(String),

    /// `listen` was called before a successful `connect`.
    #[error("not connected")]
    NotConnected,

    /// A login handshake is already in flight.
    #[error("already connecting")]
    AlreadyConnecting,

    /// A poll loop is already running for this connector.
    #[error("already listening")]
    AlreadyListening,

    /// The session was closed by `disconnect`.
    #[error("session closed")]
    SessionClosed,
}
