//! Lifecycle facade: connect, listen, respond, disconnect.
//!
//! ```text
//! Created ──connect──▶ Connecting ──200──▶ Connected ──listen──▶ Listening
//!    ▲                     │                                        │
//!    └──── connect ─── Failed ◀────── non-200 / poll error ─────────┘
//!
//! any ──disconnect──▶ Disconnected
//! ```
//!
//! A connector built from incomplete credentials starts (and stays) `Inert`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::{self, Credentials, Identity};
use super::poll::PollLoop;
use super::session::Session;
use super::translate::to_outbound;
use super::watermark::Watermark;
use super::RocketChatError;
use crate::config::ConnectorConfig;
use crate::dispatch::Dispatch;
use crate::types::Message;

/// How long `disconnect` waits for the poll task before aborting it.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Lifecycle state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Credentials missing or invalid; nothing will ever be sent.
    Inert,
    /// Constructed, not yet logged in.
    Created,
    /// Login handshake in flight.
    Connecting,
    /// Logged in; `listen` may start.
    Connected,
    /// Poll loop running.
    Listening,
    /// Login refused or poll loop died; `connect` again to recover.
    Failed,
    /// Shut down for good.
    Disconnected,
}

/// Outcome of a best-effort send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted with HTTP 200.
    Sent,
    /// The server answered with a non-200 status.
    Rejected {
        /// Status returned by `chat.postMessage`.
        status: StatusCode,
    },
    /// The request never got a response (unavailable connector, closed
    /// session, or transport failure).
    Undelivered,
}

/// One Rocket.Chat account, polled by one background task.
pub struct RocketChatConnector {
    name: String,
    credentials: Option<Arc<Credentials>>,
    session: Option<Arc<Session>>,
    /// Why the connector is inert, when it is.
    unavailable: Option<String>,
    dispatch: Arc<dyn Dispatch>,
    watermark: Arc<Watermark>,
    cancel: CancellationToken,
    listening: Arc<AtomicBool>,
    state: watch::Sender<ConnectorState>,
    poll_task: Mutex<Option<JoinHandle<Result<(), RocketChatError>>>>,
    /// Fires when the current poll task has finished, however it ended.
    poll_exited: Mutex<Option<CancellationToken>>,
    shutdown_timeout: Duration,
}

impl RocketChatConnector {
    /// Build a connector from its config table.
    ///
    /// Never fails: incomplete credentials are logged and leave the
    /// connector [`ConnectorState::Inert`].
    pub fn new(config: &ConnectorConfig, dispatch: Arc<dyn Dispatch>) -> Self {
        let (credentials, unavailable) = match Credentials::from_config(config) {
            Ok(creds) => (Some(Arc::new(creds)), None),
            Err(RocketChatError::MissingCredential(field)) => {
                error!(
                    connector = %config.name,
                    missing = field,
                    "Unable to login: Access token is missing. Rocket.Chat connector will not be available."
                );
                (None, Some(format!("missing {field}")))
            }
            Err(e) => {
                error!(
                    connector = %config.name,
                    error = %e,
                    "Invalid configuration. Rocket.Chat connector will not be available."
                );
                (None, Some(e.to_string()))
            }
        };

        let session = credentials.as_deref().map(|c| Arc::new(Session::new(c)));
        let initial = if credentials.is_some() {
            ConnectorState::Created
        } else {
            ConnectorState::Inert
        };
        let (state, _rx) = watch::channel(initial);

        Self {
            name: config.name.clone(),
            credentials,
            session,
            unavailable,
            dispatch,
            watermark: Arc::new(Watermark::now()),
            cancel: CancellationToken::new(),
            listening: Arc::new(AtomicBool::new(false)),
            state,
            poll_task: Mutex::new(None),
            poll_exited: Mutex::new(None),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// Start polling from `watermark` instead of "now".
    #[must_use]
    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Arc::new(watermark);
        self
    }

    /// Bound how long `disconnect` waits for the poll task.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Connector display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validated settings, absent when inert.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_deref()
    }

    /// Room used for replies without a target.
    pub fn default_target(&self) -> Option<&str> {
        self.credentials().map(|c| c.default_target.as_str())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// Whether the poll loop is running and healthy.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Processed-up-to timestamp.
    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// The HTTP session, absent when inert.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Identity confirmed by the last successful `connect`.
    pub async fn identity(&self) -> Option<Identity> {
        match &self.session {
            Some(session) => session.identity().await,
            None => None,
        }
    }

    fn unavailable_error(&self) -> RocketChatError {
        RocketChatError::Unavailable(
            self.unavailable
                .clone()
                .unwrap_or_else(|| "no credentials".to_owned()),
        )
    }

    /// Log in with the configured token.
    ///
    /// On failure the error is logged, the connector moves to
    /// [`ConnectorState::Failed`] and the error is returned; `listen` must not
    /// be called until a later `connect` succeeds.
    ///
    /// # Errors
    ///
    /// [`RocketChatError::Auth`] for a non-200 login response,
    /// [`RocketChatError::Transport`] when the server is unreachable, and
    /// lifecycle errors when inert, already connecting, listening or
    /// disconnected.
    pub async fn connect(&self) -> Result<Identity, RocketChatError> {
        let Some(session) = self.session.as_ref() else {
            let err = self.unavailable_error();
            error!(connector = %self.name, error = %err, "Cannot connect to Rocket.Chat");
            return Err(err);
        };

        let mut refused = None;
        self.state.send_if_modified(|state| match state {
            ConnectorState::Created | ConnectorState::Connected | ConnectorState::Failed => {
                *state = ConnectorState::Connecting;
                true
            }
            other => {
                refused = Some(*other);
                false
            }
        });
        match refused {
            Some(ConnectorState::Disconnected) => return Err(RocketChatError::SessionClosed),
            Some(ConnectorState::Listening) => return Err(RocketChatError::AlreadyListening),
            Some(ConnectorState::Connecting) => return Err(RocketChatError::AlreadyConnecting),
            _ => {}
        }

        info!(connector = %self.name, url = %session.url("me"), "Connecting to Rocket.Chat");
        match auth::login(session).await {
            Ok(identity) => {
                self.transition(ConnectorState::Connecting, ConnectorState::Connected);
                debug!(
                    connector = %self.name,
                    username = %identity.username,
                    "Connected to Rocket.Chat as {}",
                    identity.username
                );
                Ok(identity)
            }
            Err(e) => {
                let status = match &e {
                    RocketChatError::Auth { status, .. } => Some(*status),
                    _ => None,
                };
                error!(
                    connector = %self.name,
                    status = ?status,
                    error = %e,
                    "Error connecting to Rocket.Chat"
                );
                self.transition(ConnectorState::Connecting, ConnectorState::Failed);
                Err(e)
            }
        }
    }

    /// Run the poll loop in a background task until [`disconnect`] is called
    /// or the loop fails.
    ///
    /// Does not poll inline; it only supervises the spawned task. Returns
    /// `Ok(())` after a cancellation, once the task has exited.
    ///
    /// [`disconnect`]: RocketChatConnector::disconnect
    ///
    /// # Errors
    ///
    /// [`RocketChatError::NotConnected`] before a successful `connect`,
    /// [`RocketChatError::AlreadyListening`] if a loop is already running,
    /// and the loop's own error ([`RocketChatError::Poll`] or
    /// [`RocketChatError::Transport`]) when it stops on its own. In that case
    /// the connector is left [`ConnectorState::Failed`].
    pub async fn listen(&self) -> Result<(), RocketChatError> {
        let (Some(session), Some(credentials)) = (self.session.as_ref(), self.credentials.as_ref())
        else {
            return Err(self.unavailable_error());
        };

        let mut refused = None;
        self.state.send_if_modified(|state| {
            if *state == ConnectorState::Connected {
                *state = ConnectorState::Listening;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        match refused {
            None => {}
            Some(ConnectorState::Listening) => return Err(RocketChatError::AlreadyListening),
            Some(ConnectorState::Disconnected) => return Err(RocketChatError::SessionClosed),
            Some(_) => return Err(RocketChatError::NotConnected),
        }

        let poll = PollLoop::new(
            Arc::clone(session),
            Arc::clone(credentials),
            Arc::clone(&self.watermark),
            Arc::clone(&self.dispatch),
            Arc::clone(&self.listening),
        );
        let exited = CancellationToken::new();
        let exit_guard = exited.clone().drop_guard();
        let cancel = self.cancel.clone();

        self.listening.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let _exit_guard = exit_guard;
            poll.run(cancel).await
        });
        *self.poll_task.lock().await = Some(handle);
        *self.poll_exited.lock().await = Some(exited.clone());

        tokio::select! {
            () = self.cancel.cancelled() => {
                debug!(connector = %self.name, "listen observed cancellation");
            }
            () = exited.cancelled() => {}
        }

        let handle = self.poll_task.lock().await.take();
        let result = match handle {
            Some(handle) => self.join(handle).await,
            // disconnect() took the handle and joined it.
            None => Ok(()),
        };
        self.listening.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            error!(connector = %self.name, error = %e, "Rocket.Chat poll loop stopped");
            self.transition(ConnectorState::Listening, ConnectorState::Failed);
        }
        result
    }

    /// Send `event` to its room. Best effort: the outcome is logged and
    /// returned, never raised.
    pub async fn respond(&self, event: &Message) -> Delivery {
        let (Some(session), Some(credentials)) = (self.session.as_ref(), self.credentials.as_ref())
        else {
            error!(connector = %self.name, "Rocket.Chat connector unavailable, dropping response");
            return Delivery::Undelivered;
        };

        let payload = to_outbound(
            event,
            &credentials.default_target,
            credentials.bot_name.as_deref(),
        );
        debug!(channel = %payload.channel, "Responding with: {}", payload.text);

        match session.post_json("chat.postMessage", &payload).await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!(channel = %payload.channel, "Successfully responded");
                Delivery::Sent
            }
            Ok(resp) => {
                let status = resp.status();
                let reason = auth::error_message(resp).await;
                warn!(
                    %status,
                    channel = %payload.channel,
                    error = %RocketChatError::Respond { status },
                    "Unable to respond: {reason}"
                );
                Delivery::Rejected { status }
            }
            Err(e) => {
                warn!(channel = %payload.channel, error = %e, "Unable to respond");
                Delivery::Undelivered
            }
        }
    }

    /// Stop polling and close the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.listening.store(false, Ordering::SeqCst);

        let handle = self.poll_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = self.join(handle).await {
                warn!(connector = %self.name, error = %e, "poll loop ended with error during disconnect");
            }
        }
        // listen() may hold the handle; wait for the task itself to finish.
        let exited = self.poll_exited.lock().await.clone();
        if let Some(exited) = exited {
            if tokio::time::timeout(self.shutdown_timeout, exited.cancelled())
                .await
                .is_err()
            {
                warn!(connector = %self.name, "poll task still running after disconnect timeout");
            }
        }

        if let Some(session) = &self.session {
            if session.close().await {
                info!(connector = %self.name, "Disconnected from Rocket.Chat");
            }
        }
        self.state.send_replace(ConnectorState::Disconnected);
    }

    /// Wait for the poll task, aborting it after the shutdown timeout.
    async fn join(
        &self,
        mut handle: JoinHandle<Result<(), RocketChatError>>,
    ) -> Result<(), RocketChatError> {
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RocketChatError::TaskFailed(join_err.to_string())),
            Err(_) => {
                warn!(
                    connector = %self.name,
                    timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    "poll task did not stop in time, aborting"
                );
                handle.abort();
                Ok(())
            }
        }
    }

    /// Move `from → to`, leaving any other state (e.g. a concurrent
    /// disconnect) untouched.
    fn transition(&self, from: ConnectorState, to: ConnectorState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }
}
