//! Seam between the connector and the message-processing core.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::Message;

/// Receiver of normalized inbound events.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Hand one event to the core. Called once per inbound message, in order.
    async fn submit(&self, event: Message);
}

#[async_trait]
impl Dispatch for mpsc::Sender<Message> {
    async fn submit(&self, event: Message) {
        let event_id = event.event_id;
        if self.send(event).await.is_err() {
            warn!(%event_id, "dispatch channel closed, dropping inbound event");
        }
    }
}
