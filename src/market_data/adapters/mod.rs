// Shared trait + events for depth feed transports

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("feed closed by remote{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ClosedByRemote(Option<String>),
    #[error("instrument {0} is not available on this feed")]
    UnsupportedInstrument(String),
    #[error("feed ended without a close frame")]
    Disconnected,
    #[error("no async runtime available to drive the feed")]
    NoRuntime,
}

/// What a transport pushes into a session, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The underlying connection is up; no book data yet.
    Connected,
    /// One raw text frame, normalised by the session.
    Payload(String),
    /// Terminal. Nothing after this is read.
    Failed(FeedError),
}

#[async_trait::async_trait]
pub trait FeedTransport: Send + Sync {
    /// Stream depth frames for `symbol` into `tx` until the connection ends or
    /// the receiver goes away. Dropping the returned future must release the
    /// connection.
    async fn stream(&self, symbol: String, tx: mpsc::Sender<FeedEvent>);
}

pub mod binance;
pub mod binance_types;
pub mod channel;
