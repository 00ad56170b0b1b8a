use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::market_data::adapters::FeedEvent;
use crate::market_data::normaliser::Normaliser;
use crate::session::state::{SessionState, SessionUpdate};
use crate::telemetry;

type UpdateCallback = Arc<dyn Fn(&SessionUpdate) + Send + Sync>;

/// Shared state behind every clone of a [`SessionHandle`].
///
/// A session may only write while `stale` is unset and its `generation` still
/// equals the manager's counter. All writes and callback deliveries happen
/// under `delivery`, so `shutdown` can wait out an in-flight delivery before it
/// returns. The lock is re-entrant so callbacks may close their own session.
pub(crate) struct SessionInner {
    generation: u64,
    symbol: String,
    manager_generation: Arc<AtomicU64>,
    normaliser: Normaliser,
    stale: AtomicBool,
    released: AtomicBool,
    delivery: ReentrantMutex<()>,
    latest: Mutex<SessionUpdate>,
    callbacks: RwLock<Vec<UpdateCallback>>,
    watch_tx: watch::Sender<SessionUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    pub(crate) fn new(
        symbol: &str,
        generation: u64,
        manager_generation: Arc<AtomicU64>,
        normaliser: Normaliser,
        state: SessionState,
    ) -> Self {
        let initial = SessionUpdate::new(symbol, generation, state);
        let (watch_tx, _) = watch::channel(initial.clone());
        // an idle session never streams, so it starts out torn down
        let inert = state == SessionState::Idle;
        Self {
            generation,
            symbol: symbol.to_string(),
            manager_generation,
            normaliser,
            stale: AtomicBool::new(inert),
            released: AtomicBool::new(inert),
            delivery: ReentrantMutex::new(()),
            latest: Mutex::new(initial),
            callbacks: RwLock::new(Vec::new()),
            watch_tx,
            task: Mutex::new(None),
        }
    }

    pub(crate) fn symbol(&self) -> &str {
        &self.symbol
    }

    pub(crate) fn is_current(&self) -> bool {
        !self.stale.load(Ordering::Acquire)
            && self.manager_generation.load(Ordering::Acquire) == self.generation
    }

    /// Stops delivery without waiting; `shutdown` completes the teardown.
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock();
        if self.released.load(Ordering::Acquire) {
            task.abort();
        } else {
            *slot = Some(task);
        }
    }

    /// Applies one transport event. Returns `true` when the session should stop
    /// reading from the transport.
    pub(crate) fn handle_event(&self, event: FeedEvent) -> bool {
        let _delivery = self.delivery.lock();
        if !self.is_current() {
            metrics::counter!(telemetry::STALE_DISCARDED, "symbol" => self.symbol.clone())
                .increment(1);
            trace!(symbol = %self.symbol, generation = self.generation, "Discarding event for stale session");
            return true;
        }

        let update = match event {
            FeedEvent::Connected => {
                debug!(symbol = %self.symbol, generation = self.generation, "Transport up, waiting for first snapshot");
                return false;
            }
            FeedEvent::Payload(raw) => {
                metrics::counter!(telemetry::MESSAGES_TOTAL, "symbol" => self.symbol.clone())
                    .increment(1);
                let Some(book) = self.normaliser.normalise(&raw) else {
                    metrics::counter!(telemetry::MESSAGES_DROPPED, "symbol" => self.symbol.clone())
                        .increment(1);
                    return false;
                };
                let mut latest = self.latest.lock();
                if latest.state == SessionState::Connecting {
                    info!(symbol = %self.symbol, generation = self.generation, "First snapshot received, session connected");
                }
                latest.apply_book(book);
                if let Some(mid) = latest.mid_price.and_then(|m| m.to_f64()) {
                    metrics::gauge!(telemetry::MID_PRICE, "symbol" => self.symbol.clone()).set(mid);
                }
                latest.clone()
            }
            FeedEvent::Failed(err) => {
                metrics::counter!(telemetry::TRANSPORT_ERRORS, "symbol" => self.symbol.clone())
                    .increment(1);
                warn!(symbol = %self.symbol, generation = self.generation, error = %err, "Session transport failed");
                let mut latest = self.latest.lock();
                latest.fail(err.to_string());
                latest.clone()
            }
        };

        self.publish(&update);
        update.state == SessionState::Error
    }

    fn publish(&self, update: &SessionUpdate) {
        let callbacks: Vec<UpdateCallback> = self.callbacks.read().clone();
        for callback in &callbacks {
            // a callback may have closed us or opened another instrument
            if !self.is_current() {
                return;
            }
            callback(update);
        }
        if self.is_current() {
            self.watch_tx.send_replace(update.clone());
        }
    }

    /// Marks the session stale, waits for any delivery in progress, then
    /// aborts the transport task. Safe to call any number of times.
    pub(crate) fn shutdown(&self) {
        self.mark_stale();
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _delivery = self.delivery.lock();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let update = {
            let mut latest = self.latest.lock();
            latest.close();
            latest.clone()
        };
        self.watch_tx.send_replace(update);
        info!(symbol = %self.symbol, generation = self.generation, "Session closed");
    }
}

/// Caller-side reference to one feed session. Clones share the same session.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub(crate) fn from_inner(inner: SessionInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn symbol(&self) -> &str {
        &self.inner.symbol
    }

    pub fn state(&self) -> SessionState {
        self.inner.latest.lock().state
    }

    /// Last published state of this session.
    pub fn latest(&self) -> SessionUpdate {
        self.inner.latest.lock().clone()
    }

    /// `false` once closed or superseded by a later `open`.
    pub fn is_current(&self) -> bool {
        self.inner.is_current()
    }

    /// Registers `callback` for every update of this session, in transport
    /// order. Never invoked after `close` returns.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&SessionUpdate) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().push(Arc::new(callback));
    }

    /// Coalescing view for render loops: a slow reader only sees the latest update.
    pub fn watch(&self) -> watch::Receiver<SessionUpdate> {
        self.inner.watch_tx.subscribe()
    }

    /// Closes the session and releases its transport. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("symbol", &self.inner.symbol)
            .field("generation", &self.inner.generation)
            .field("state", &self.state())
            .finish()
    }
}
