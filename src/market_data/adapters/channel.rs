// Scripted transport: frames are pushed by the caller through per-symbol senders.
// Used to replay captured feeds and to drive sessions deterministically.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{FeedError, FeedEvent, FeedTransport};

#[derive(Default)]
pub struct ChannelTransport {
    feeds: Mutex<HashMap<String, mpsc::UnboundedReceiver<FeedEvent>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a feed for `symbol`. The next session opened on that symbol
    /// consumes it; sending after that session is gone returns an error.
    pub fn feed(&self, symbol: &str) -> mpsc::UnboundedSender<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().insert(symbol.to_string(), rx);
        tx
    }
}

#[async_trait::async_trait]
impl FeedTransport for ChannelTransport {
    async fn stream(&self, symbol: String, tx: mpsc::Sender<FeedEvent>) {
        let feed = self.feeds.lock().remove(&symbol);
        let Some(mut feed) = feed else {
            let _ = tx.send(FeedEvent::Failed(FeedError::UnsupportedInstrument(symbol))).await;
            return;
        };
        debug!(symbol, "Scripted feed attached");
        while let Some(event) = feed.recv().await {
            if tx.send(event).await.is_err() {
                return;
            }
        }
        let _ = tx.send(FeedEvent::Failed(FeedError::Disconnected)).await;
    }
}
