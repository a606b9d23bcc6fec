//! Last-processed timestamp bounding each history query.

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;

/// Monotonic "processed up to" instant.
///
/// Shared between the connector (readers) and the poll loop (sole writer).
/// Backed by a `watch` channel so reads never block and a supervisor can
/// await progress with [`Watermark::subscribe`].
#[derive(Debug)]
pub struct Watermark {
    tx: watch::Sender<DateTime<Utc>>,
}

impl Watermark {
    /// Start at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        let (tx, _rx) = watch::channel(at);
        Self { tx }
    }

    /// Start at the current time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Current value.
    pub fn get(&self) -> DateTime<Utc> {
        *self.tx.borrow()
    }

    /// Move forward to `candidate`. Returns `false` (and keeps the old value)
    /// when `candidate` is not later than the current watermark.
    pub fn advance(&self, candidate: DateTime<Utc>) -> bool {
        self.tx.send_if_modified(|current| {
            if candidate > *current {
                *current = candidate;
                true
            } else {
                false
            }
        })
    }

    /// Value as sent in the `oldest` query parameter,
    /// e.g. `2018-05-11T16:05:41.047Z`.
    pub fn as_query(&self) -> String {
        wire_timestamp(self.get())
    }

    /// Receiver notified on every advance.
    pub fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.tx.subscribe()
    }
}

/// Render an instant the way the history API expects it:
/// RFC 3339, millisecond precision, `Z` suffix.
pub fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Default for Watermark {
    fn default() -> Self {
        Self::now()
    }
}
