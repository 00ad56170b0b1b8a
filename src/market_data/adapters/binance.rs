// Binance partial-depth adapter over tokio-tungstenite

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};

use super::{FeedError, FeedEvent, FeedTransport};
use crate::config::FeedSettings;

pub struct BinanceDepthAdapter {
    pub base_url: String,    // "wss://stream.binance.com:9443/ws"
    pub quote_asset: String, // "usdt", appended to the instrument symbol
    pub stream: String,      // "depth10@100ms"
}

impl BinanceDepthAdapter {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            quote_asset: settings.quote_asset.to_lowercase(),
            stream: settings.stream.clone(),
        }
    }

    /// "BTC" -> "wss://.../ws/btcusdt@depth10@100ms"
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}{}@{}",
            self.base_url,
            symbol.trim().to_lowercase(),
            self.quote_asset,
            self.stream
        )
    }

    async fn pump(&self, url: &str, tx: &mpsc::Sender<FeedEvent>) -> Result<(), FeedError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            FeedError::Connect { url: url.to_string(), reason: e.to_string() }
        })?;
        info!(url, status = %response.status(), "Connected to depth stream");
        if tx.send(FeedEvent::Connected).await.is_err() {
            return Ok(());
        }

        let (mut write, mut read) = ws_stream.split();
        let mut message_count: u64 = 0;
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    message_count += 1;
                    trace!(message_count, len = text.len(), "Depth frame received");
                    if tx.send(FeedEvent::Payload(text)).await.is_err() {
                        // session went away; stop reading
                        debug!(url, "Receiver dropped, leaving stream");
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        return Err(FeedError::Transport(e.to_string()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                    return Err(FeedError::ClosedByRemote(reason));
                }
                Ok(other) => {
                    trace!(?other, "Ignoring non-text frame");
                }
                Err(e) => return Err(FeedError::Transport(e.to_string())),
            }
        }
        Err(FeedError::Disconnected)
    }
}

#[async_trait::async_trait]
impl FeedTransport for BinanceDepthAdapter {
    #[instrument(skip(self, tx))]
    async fn stream(&self, symbol: String, tx: mpsc::Sender<FeedEvent>) {
        let url = self.stream_url(&symbol);
        debug!(url, "Opening depth stream");
        if let Err(e) = self.pump(&url, &tx).await {
            warn!(url, error = %e, "Depth stream failed");
            let _ = tx.send(FeedEvent::Failed(e)).await;
        }
    }
}
