//! History polling loop.
//!
//! One loop per connector. Each cycle sleeps for the configured interval,
//! fetches the room history newer than the watermark (several requests when
//! pages come back full), forwards every record to the dispatch core in
//! chronological order, and only then advances the watermark to the newest
//! forwarded timestamp.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::Credentials;
use super::session::Session;
use super::translate::{chronological, to_event, RemoteMessage};
use super::watermark::{wire_timestamp, Watermark};
use super::RocketChatError;
use crate::dispatch::Dispatch;

/// Body of `channels.history` / `groups.history`.
#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

/// The background poller for one connector.
pub struct PollLoop {
    session: Arc<Session>,
    credentials: Arc<Credentials>,
    watermark: Arc<Watermark>,
    dispatch: Arc<dyn Dispatch>,
    listening: Arc<AtomicBool>,
}

impl PollLoop {
    /// Wire a loop to the connector's shared state.
    pub fn new(
        session: Arc<Session>,
        credentials: Arc<Credentials>,
        watermark: Arc<Watermark>,
        dispatch: Arc<dyn Dispatch>,
        listening: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            credentials,
            watermark,
            dispatch,
            listening,
        }
    }

    /// Poll until `cancel` fires or a cycle fails.
    ///
    /// Returns `Ok(())` only on cancellation. A non-200 history response
    /// clears the listening flag and returns [`RocketChatError::Poll`];
    /// transport failures are returned as-is for the supervisor to handle.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RocketChatError> {
        let interval = self.credentials.poll_interval;
        info!(
            room = self.credentials.poll_room(),
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Rocket.Chat poll loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }

            let page = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                page = self.fetch_page() => page?,
            };
            self.forward(page).await;
        }

        info!("Rocket.Chat poll loop cancelled");
        Ok(())
    }

    /// One fetch + forward cycle without the sleep. Returns the number of
    /// records forwarded.
    ///
    /// # Errors
    ///
    /// Same as [`PollLoop::run`].
    pub async fn poll_once(&self) -> Result<usize, RocketChatError> {
        let page = self.fetch_page().await?;
        Ok(self.forward(page).await)
    }

    /// Fetch every record newer than the watermark, oldest first.
    ///
    /// History comes back newest first and capped at `page_size`. A full
    /// page means older records may remain, so the next request asks for
    /// everything up to the oldest timestamp seen so far (inclusive, records
    /// already collected are dropped by id) until a short page arrives.
    async fn fetch_page(&self) -> Result<Vec<RemoteMessage>, RocketChatError> {
        let oldest = self.watermark.get();
        let page_size = usize::try_from(self.credentials.page_size).unwrap_or(usize::MAX);
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut latest = None;

        loop {
            let batch = self.fetch_batch(oldest, latest).await?;
            let full = batch.len() >= page_size;
            let collected = records.len();
            let mut earliest: Option<DateTime<Utc>> = None;

            for value in batch {
                let record = match RemoteMessage::from_value(value) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable Rocket.Chat message");
                        continue;
                    }
                };
                earliest = Some(earliest.map_or(record.ts, |at| at.min(record.ts)));
                // The server filters on `oldest`; this guards against replays
                // from servers that treat it as inclusive.
                if record.ts <= oldest {
                    debug!(id = %record.id, "skipping already processed Rocket.Chat message");
                } else if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }

            match earliest {
                Some(at) if full && at > oldest => {
                    if records.len() == collected {
                        warn!(
                            page_size,
                            "Rocket.Chat history page brought no new records, stopping backfill"
                        );
                        break;
                    }
                    debug!(
                        latest = %wire_timestamp(at),
                        collected = records.len(),
                        "Rocket.Chat history page full, fetching older records"
                    );
                    latest = Some(at);
                }
                _ => break,
            }
        }
        Ok(chronological(records))
    }

    /// One history request. `latest` bounds a backfill request from above.
    async fn fetch_batch(
        &self,
        oldest: DateTime<Utc>,
        latest: Option<DateTime<Utc>>,
    ) -> Result<Vec<serde_json::Value>, RocketChatError> {
        let mut query = vec![
            ("roomName", self.credentials.poll_room().to_owned()),
            ("oldest", wire_timestamp(oldest)),
            ("count", self.credentials.page_size.to_string()),
        ];
        if let Some(latest) = latest {
            query.push(("latest", wire_timestamp(latest)));
            query.push(("inclusive", "true".to_owned()));
        }
        let resp = self
            .session
            .get(self.credentials.history_method(), &query)
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!(
                %status,
                room = self.credentials.poll_room(),
                "Rocket.Chat history poll failed: {body}"
            );
            self.listening.store(false, Ordering::SeqCst);
            return Err(RocketChatError::Poll { status });
        }

        let page: HistoryPage = resp.json().await?;
        Ok(page.messages)
    }

    /// Submit every record, then advance the watermark once for the page.
    async fn forward(&self, records: Vec<RemoteMessage>) -> usize {
        let Some(newest) = records.last().map(|r| r.ts) else {
            return 0;
        };
        let count = records.len();

        for record in &records {
            let event = to_event(record, &self.credentials.name);
            debug!(
                user = %event.user,
                target = %event.target,
                "Received message from Rocket.Chat: {}",
                event.text
            );
            self.dispatch.submit(event).await;
        }

        self.watermark.advance(newest);
        debug!(count, watermark = %self.watermark.as_query(), "Rocket.Chat page forwarded");
        count
    }
}
