use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::config::Settings;
use crate::market_data::adapters::{FeedError, FeedEvent, FeedTransport};
use crate::market_data::normaliser::Normaliser;
use crate::session::handle::{SessionHandle, SessionInner};
use crate::session::state::SessionState;
use crate::telemetry;

/// Owns at most one live feed session per consumer.
///
/// Every `open` bumps a generation counter before anything else happens, and a
/// session only writes while its own generation is still the current one, so a
/// slow-dying transport for the previous instrument can never touch the new one.
pub struct SessionManager {
    transport: Arc<dyn FeedTransport>,
    normaliser: Normaliser,
    channel_capacity: usize,
    generation: Arc<AtomicU64>,
    current: Mutex<Option<SessionHandle>>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn FeedTransport>, normaliser: Normaliser, channel_capacity: usize) -> Self {
        Self {
            transport,
            normaliser,
            channel_capacity: channel_capacity.max(1),
            generation: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
        }
    }

    pub fn from_settings(transport: Arc<dyn FeedTransport>, settings: &Settings) -> Self {
        Self::new(
            transport,
            Normaliser::new(settings.book.max_levels),
            settings.feed.channel_capacity,
        )
    }

    /// Starts a session for `symbol`, closing the previous one first.
    ///
    /// Returns immediately; the connection comes up in the background. An
    /// empty symbol only closes the previous session and yields an idle handle.
    #[instrument(skip(self))]
    pub fn open(&self, symbol: &str) -> SessionHandle {
        let symbol = symbol.trim();
        let (previous, handle) = {
            let mut current = self.current.lock();
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let previous = current.take();
            if let Some(prev) = &previous {
                prev.inner.mark_stale();
            }
            let state = if symbol.is_empty() { SessionState::Idle } else { SessionState::Connecting };
            let handle = SessionHandle::from_inner(SessionInner::new(
                symbol,
                generation,
                self.generation.clone(),
                self.normaliser,
                state,
            ));
            if state == SessionState::Connecting {
                *current = Some(handle.clone());
            }
            (previous, handle)
        };

        if let Some(prev) = previous {
            debug!(symbol = prev.symbol(), generation = prev.generation(), "Closing superseded session");
            prev.close();
        }

        if handle.state() == SessionState::Connecting {
            metrics::counter!(telemetry::SESSIONS_OPENED, "symbol" => symbol.to_string()).increment(1);
            info!(symbol, generation = handle.generation(), "Opening feed session");
            self.spawn_session(&handle);
        } else {
            debug!(generation = handle.generation(), "No instrument selected, session idle");
        }
        handle
    }

    /// Instrument selector entry point: `None` means nothing is selected.
    pub fn select(&self, symbol: Option<&str>) -> SessionHandle {
        self.open(symbol.unwrap_or_default())
    }

    /// Re-opens the instrument of the current session, typically after `Error`.
    /// The failed session is closed before the new one starts.
    pub fn retry(&self) -> Option<SessionHandle> {
        let symbol = self.current.lock().as_ref().map(|h| h.symbol().to_string())?;
        info!(symbol, "Retrying feed session");
        Some(self.open(&symbol))
    }

    pub fn current(&self) -> Option<SessionHandle> {
        self.current.lock().clone()
    }

    /// Closes `handle`; forgets it as current if it still is.
    pub fn close(&self, handle: &SessionHandle) {
        {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|h| h.generation() == handle.generation()) {
                *current = None;
            }
        }
        handle.close();
    }

    pub fn close_current(&self) {
        let current = self.current.lock().take();
        if let Some(handle) = current {
            handle.close();
        }
    }

    fn spawn_session(&self, handle: &SessionHandle) {
        let inner = handle.inner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(run_session(
                    inner.clone(),
                    self.transport.clone(),
                    self.channel_capacity,
                ));
                inner.set_task(task);
            }
            Err(_) => {
                inner.handle_event(FeedEvent::Failed(FeedError::NoRuntime));
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_current();
    }
}

/// Drives one session: pumps the transport into a bounded channel and applies
/// events in arrival order until the session fails, goes stale, or is aborted.
async fn run_session(inner: Arc<SessionInner>, transport: Arc<dyn FeedTransport>, capacity: usize) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let pump = transport.stream(inner.symbol().to_string(), tx);
    tokio::pin!(pump);
    let mut pumping = true;
    loop {
        tokio::select! {
            _ = &mut pump, if pumping => {
                pumping = false;
            }
            event = rx.recv() => {
                // the transport returned without a terminal event
                let event = event.unwrap_or(FeedEvent::Failed(FeedError::Disconnected));
                if inner.handle_event(event) {
                    break;
                }
            }
        }
    }
    debug!(symbol = inner.symbol(), "Session task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::channel::ChannelTransport;
    use crate::session::state::SessionUpdate;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn manager(transport: &Arc<ChannelTransport>) -> SessionManager {
        SessionManager::new(transport.clone(), Normaliser::default(), 64)
    }

    fn collect(handle: &SessionHandle) -> UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.on_update(move |u| {
            let _ = tx.send(u.clone());
        });
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<SessionUpdate>) -> SessionUpdate {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update channel closed")
    }

    #[tokio::test]
    async fn test_open_streams_snapshots() {
        let transport = Arc::new(ChannelTransport::new());
        let feed = transport.feed("BTC");
        let manager = manager(&transport);

        let handle = manager.open("BTC");
        assert_eq!(handle.state(), SessionState::Connecting);
        let mut rx = collect(&handle);

        feed.send(FeedEvent::Connected).unwrap();
        feed.send(FeedEvent::Payload(
            r#"{"bids":[["100.00","2"],["99.50","1"]],"asks":[["100.50","3"],["101.00","1"]]}"#.into(),
        ))
        .unwrap();
        let update = next(&mut rx).await;
        assert_eq!(update.state, SessionState::Connected);
        assert_eq!(update.symbol, "BTC");
        assert_eq!(update.mid_price, Some(dec!(100.25)));
        assert_eq!(update.bids().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_symbol_closes_previous_and_idles() {
        let transport = Arc::new(ChannelTransport::new());
        let _feed = transport.feed("BTC");
        let manager = manager(&transport);

        let btc = manager.open("BTC");
        let idle = manager.select(None);
        assert_eq!(idle.state(), SessionState::Idle);
        assert!(!idle.is_current());
        assert_eq!(btc.state(), SessionState::Closed);
        assert!(manager.current().is_none());
        // closing an idle handle is a no-op
        idle.close();
        assert_eq!(idle.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unsupported_instrument_errors() {
        let transport = Arc::new(ChannelTransport::new());
        let manager = manager(&transport);

        let handle = manager.open("NOPE");
        let mut watch = handle.watch();
        tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|u| u.state == SessionState::Error))
            .await
            .expect("timed out")
            .expect("watch closed");
        let latest = handle.latest();
        assert!(latest.error.unwrap().contains("NOPE"));
        assert!(latest.book.is_empty());
    }

    #[tokio::test]
    async fn test_retry_replaces_failed_session() {
        let transport = Arc::new(ChannelTransport::new());
        let feed = transport.feed("ETH");
        let manager = manager(&transport);

        let first = manager.open("ETH");
        let mut rx = collect(&first);
        feed.send(FeedEvent::Failed(FeedError::Transport("reset".into()))).unwrap();
        assert_eq!(next(&mut rx).await.state, SessionState::Error);

        let feed = transport.feed("ETH");
        let second = manager.retry().expect("current session");
        assert!(second.generation() > first.generation());
        assert_eq!(first.state(), SessionState::Closed);
        let mut rx = collect(&second);
        feed.send(FeedEvent::Payload(r#"{"bids":[["10","1"]],"asks":[["12","1"]]}"#.into()))
            .unwrap();
        let update = next(&mut rx).await;
        assert_eq!(update.state, SessionState::Connected);
        assert_eq!(update.mid_price, Some(dec!(11)));
    }

    #[tokio::test]
    async fn test_superseded_session_cannot_write_after_open() {
        let transport = Arc::new(ChannelTransport::new());
        let btc_feed = transport.feed("BTC");
        let eth_feed = transport.feed("ETH");
        let manager = manager(&transport);

        let btc = manager.open("BTC");
        let mut btc_rx = collect(&btc);
        btc_feed
            .send(FeedEvent::Payload(r#"{"bids":[["100","1"]],"asks":[["102","1"]]}"#.into()))
            .unwrap();
        assert_eq!(next(&mut btc_rx).await.mid_price, Some(dec!(101)));

        let eth = manager.open("ETH");
        let mut eth_rx = collect(&eth);
        let mut eth_watch = eth.watch();
        eth_feed
            .send(FeedEvent::Payload(r#"{"bids":[["2000.10","4"]],"asks":[["2000.30","5"]]}"#.into()))
            .unwrap();
        assert_eq!(next(&mut eth_rx).await.mid_price, Some(dec!(2000.20)));
        eth_watch.borrow_and_update();

        // the BTC session object outlives the switch and keeps receiving events
        let late = r#"{"bids":[["1","1"]],"asks":[["3","1"]]}"#;
        assert!(btc.inner.handle_event(FeedEvent::Payload(late.into())));
        assert!(btc
            .inner
            .handle_event(FeedEvent::Failed(FeedError::Transport("reset".into()))));

        assert!(btc_rx.try_recv().is_err());
        assert!(eth_rx.try_recv().is_err());
        assert!(!eth_watch.has_changed().unwrap());
        assert_eq!(btc.state(), SessionState::Closed);
        assert_eq!(btc.latest().mid_price, None);
        assert!(btc.latest().book.is_empty());
        assert_eq!(eth.latest().mid_price, Some(dec!(2000.20)));
        assert_eq!(eth.state(), SessionState::Connected);
        assert_eq!(manager.current().unwrap().generation(), eth.generation());
    }

    #[tokio::test]
    async fn test_open_from_callback_stops_remaining_callbacks() {
        let transport = Arc::new(ChannelTransport::new());
        let btc_feed = transport.feed("BTC");
        let _eth_feed = transport.feed("ETH");
        let manager = Arc::new(manager(&transport));

        let btc = manager.open("BTC");
        let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&manager);
        btc.on_update(move |_| {
            if let Some(manager) = weak.upgrade() {
                let _ = opened_tx.send(manager.open("ETH"));
            }
        });
        let mut later = collect(&btc);

        btc_feed
            .send(FeedEvent::Payload(r#"{"bids":[["100","1"]],"asks":[["102","1"]]}"#.into()))
            .unwrap();
        let eth = tokio::time::timeout(Duration::from_secs(2), opened_rx.recv())
            .await
            .expect("timed out waiting for switch")
            .expect("callback dropped");

        assert_eq!(eth.symbol(), "ETH");
        assert!(eth.is_current());
        assert!(!btc.is_current());
        assert_eq!(btc.state(), SessionState::Closed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(later.try_recv().is_err());
        assert_eq!(btc.watch().borrow().state, SessionState::Closed);
    }

    #[test]
    fn test_open_without_runtime_errors_instead_of_panicking() {
        let transport = Arc::new(ChannelTransport::new());
        let manager = manager(&transport);
        let handle = manager.open("BTC");
        assert_eq!(handle.state(), SessionState::Error);
        assert_eq!(
            handle.latest().error.as_deref(),
            Some("no async runtime available to drive the feed")
        );
    }

    #[tokio::test]
    async fn test_drop_closes_current() {
        let transport = Arc::new(ChannelTransport::new());
        let _feed = transport.feed("SOL");
        let manager = manager(&transport);
        let handle = manager.open("SOL");
        drop(manager);
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!handle.is_current());
    }
}
