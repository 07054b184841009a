use std::sync::Arc;
use std::time::Duration;

use baerumkart_schema::KnowledgeEntity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::KnowledgeStore;

/// Live view over a store: a snapshot is delivered first, then again every
/// time the collection changes.
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<KnowledgeEntity>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wait for the next snapshot. `None` once the subscription has stopped.
    pub async fn next(&mut self) -> Option<Vec<KnowledgeEntity>> {
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll `store` every `interval` and push the collection whenever it differs
/// from the last delivered snapshot. Read failures are logged and skipped.
pub fn subscribe(store: Arc<dyn KnowledgeStore>, interval: Duration) -> Subscription {
    let (tx, receiver) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last: Option<Vec<KnowledgeEntity>> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let entities = match store.list_entities().await {
                Ok(entities) => entities,
                Err(e) => {
                    tracing::warn!("spot subscription read failed: {e:#}");
                    continue;
                }
            };
            if last.as_ref() == Some(&entities) {
                continue;
            }
            if tx.send(entities.clone()).await.is_err() {
                break;
            }
            last = Some(entities);
        }
        tracing::debug!("spot subscription stopped");
    });

    Subscription { receiver, cancel }
}
