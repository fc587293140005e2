#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::models::{ArcEventTx, Event};
use crate::store::ArcStore;

use super::ChatController;

/// Fixed-interval store poll. Each tick re-reads the owner's conversations
/// and hands the snapshot to the controller's merge rule; partial-reply
/// buffers live outside the polled state and are never touched here.
pub struct SyncService {
    owner: String,
    store: ArcStore,
    controller: Arc<ChatController>,
    event_tx: ArcEventTx,
    cancel_token: CancellationToken,
    interval: Duration,
}

impl SyncService {
    pub fn new(
        owner: impl Into<String>,
        store: ArcStore,
        controller: Arc<ChatController>,
        event_tx: ArcEventTx,
        cancel_token: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            owner: owner.into(),
            store,
            controller,
            event_tx,
            cancel_token,
            interval,
        }
    }

    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    log::debug!("Sync service cancelled");
                    return Ok(());
                }
                _ = time::sleep(self.interval) => {}
            }

            match self.store.list_conversations(&self.owner).await {
                Ok(snapshot) => {
                    self.controller.apply_snapshot(snapshot).await;
                    let list = self.controller.conversations().await;
                    if let Err(err) = self
                        .event_tx
                        .send(Event::ConversationsRefreshed(list))
                        .await
                    {
                        log::error!("Failed to publish refresh: {err}");
                    }
                }
                // A failed poll is skipped; the next tick reads again.
                Err(err) => log::warn!("Conversation poll failed: {err:?}"),
            }
        }
    }
}
