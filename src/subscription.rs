//! Push subscriptions for blocks, block metadata and contract events
//!
//! Each subscription runs one delivery task. A reader task pulls the
//! endpoint stream into a bounded channel; the delivery task hands items to
//! the observer while holding the subscription's delivery lock.
//! [`Subscription::unsubscribe`] takes the same lock before it marks the
//! subscription cancelled, so once it returns no callback can start.
//!
//! The lock is reentrant: an observer may unsubscribe from inside its own
//! callback.

use crate::endpoint::{EventFilter, LedgerEndpoint, StreamFilter, StreamItem};
use crate::errors::{ClientError, ClientResult};
use crate::metrics::metrics;
use crate::types::{Block, BlockMetadata, Event};
use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives pushed items for one subscription
///
/// `on_error` and `on_completed` are terminal and fire at most once, and
/// never both.
pub trait StreamObserver<T>: Send + Sync + 'static {
    fn on_next(&self, item: T);

    fn on_error(&self, _error: ClientError) {}

    fn on_completed(&self) {}
}

/// Observer built from a single item callback
pub struct FnObserver<F>(F);

pub fn observer_fn<T, F>(callback: F) -> FnObserver<F>
where
    F: Fn(T) + Send + Sync + 'static,
{
    FnObserver(callback)
}

impl<T, F> StreamObserver<T> for FnObserver<F>
where
    F: Fn(T) + Send + Sync + 'static,
{
    fn on_next(&self, item: T) {
        (self.0)(item)
    }
}

/// Everything an observer can be told, as a value
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
    Next(T),
    Error(ClientError),
    Completed,
}

/// Observer that forwards notifications into an unbounded channel
pub struct ChannelObserver<T> {
    sender: mpsc::UnboundedSender<Notification<T>>,
}

impl<T: Send + 'static> ChannelObserver<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<T: Send + 'static> StreamObserver<T> for ChannelObserver<T> {
    fn on_next(&self, item: T) {
        let _ = self.sender.send(Notification::Next(item));
    }

    fn on_error(&self, error: ClientError) {
        let _ = self.sender.send(Notification::Error(error));
    }

    fn on_completed(&self) {
        let _ = self.sender.send(Notification::Completed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, delivery not yet started
    Open,
    Streaming,
    Cancelled,
    Completed,
    Errored,
}

impl SubscriptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Errored)
    }
}

struct Shared {
    id: u64,
    kind: &'static str,
    state: ReentrantMutex<Cell<SubscriptionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> SubscriptionState {
        self.state.lock().get()
    }

    /// Run `notify` under the delivery lock if still streaming
    fn deliver(&self, notify: impl FnOnce()) -> bool {
        let guard = self.state.lock();
        if guard.get() != SubscriptionState::Streaming {
            return false;
        }
        notify();
        metrics().subscription_items_delivered_total.inc();
        true
    }

    /// Leave `Streaming` for `next`, running `notify` under the delivery lock
    fn terminate(&self, next: SubscriptionState, notify: impl FnOnce()) -> bool {
        let guard = self.state.lock();
        if guard.get() != SubscriptionState::Streaming {
            return false;
        }
        guard.set(next);
        metrics().subscriptions_active.dec();
        notify();
        true
    }
}

/// Handle to one open subscription
///
/// Clones share the subscription. Dropping every handle does not cancel it;
/// call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kind(&self) -> &'static str {
        self.shared.kind
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Streaming
    }

    /// Cancel delivery
    ///
    /// Blocks while a callback for this subscription is running on another
    /// thread. Returns `true` if this call cancelled the subscription and
    /// `false` if it had already ended.
    pub fn unsubscribe(&self) -> bool {
        let cancelled = self.shared.terminate(SubscriptionState::Cancelled, || {});
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
        if cancelled {
            info!(
                subscription_id = self.shared.id,
                kind = self.shared.kind,
                "Subscription cancelled"
            );
        }
        cancelled
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Opens subscriptions against one endpoint
#[derive(Clone)]
pub struct SubscriptionHub {
    endpoint: Arc<dyn LedgerEndpoint>,
    buffer: usize,
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionHub {
    /// Must be called from within a tokio runtime; delivery tasks run on it
    pub fn new(endpoint: Arc<dyn LedgerEndpoint>, buffer: usize) -> ClientResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            ClientError::Internal(format!("subscriptions need a tokio runtime: {}", e))
        })?;
        Ok(Self::with_runtime(endpoint, buffer, runtime))
    }

    pub fn with_runtime(endpoint: Arc<dyn LedgerEndpoint>, buffer: usize, runtime: Handle) -> Self {
        Self {
            endpoint,
            buffer: buffer.max(1),
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe_blocks(&self, observer: impl StreamObserver<Block>) -> Subscription {
        self.subscribe(StreamFilter::Blocks, Arc::new(observer), |item| match item {
            StreamItem::Block(block) => Some(block),
            _ => None,
        })
    }

    pub fn subscribe_block_metadata(
        &self,
        observer: impl StreamObserver<BlockMetadata>,
    ) -> Subscription {
        self.subscribe(StreamFilter::BlockMetadata, Arc::new(observer), |item| match item {
            StreamItem::BlockMetadata(metadata) => Some(metadata),
            _ => None,
        })
    }

    pub fn subscribe_events(
        &self,
        filter: EventFilter,
        observer: impl StreamObserver<Event>,
    ) -> Subscription {
        self.subscribe(StreamFilter::Events(filter), Arc::new(observer), |item| match item {
            StreamItem::Event(event) => Some(event),
            _ => None,
        })
    }

    /// Returns at once; the stream is opened on the delivery task
    fn subscribe<T: Send + 'static>(
        &self,
        filter: StreamFilter,
        observer: Arc<dyn StreamObserver<T>>,
        extract: fn(StreamItem) -> Option<T>,
    ) -> Subscription {
        let shared = Arc::new(Shared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind: filter.kind(),
            state: ReentrantMutex::new(Cell::new(SubscriptionState::Open)),
            task: Mutex::new(None),
        });
        shared.state.lock().set(SubscriptionState::Streaming);
        metrics().subscriptions_opened_total.inc();
        metrics().subscriptions_active.inc();
        info!(subscription_id = shared.id, kind = shared.kind, "Subscription opened");

        let task = self.runtime.spawn(deliver(
            shared.clone(),
            self.endpoint.clone(),
            filter,
            self.buffer,
            observer,
            extract,
        ));
        *shared.task.lock() = Some(task);
        // An observer may have cancelled before the handle was stored
        if shared.state() != SubscriptionState::Streaming {
            if let Some(task) = shared.task.lock().take() {
                task.abort();
            }
        }

        Subscription { shared }
    }
}

async fn deliver<T: Send + 'static>(
    shared: Arc<Shared>,
    endpoint: Arc<dyn LedgerEndpoint>,
    filter: StreamFilter,
    buffer: usize,
    observer: Arc<dyn StreamObserver<T>>,
    extract: fn(StreamItem) -> Option<T>,
) {
    let mut stream = match endpoint.open_stream(&filter).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(
                subscription_id = shared.id,
                kind = shared.kind,
                error = %err,
                "Failed to open stream"
            );
            shared.terminate(SubscriptionState::Errored, || observer.on_error(err));
            return;
        }
    };

    let (sender, mut receiver) = mpsc::channel(buffer);
    let _reader = AbortOnDrop(tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let terminal = item.is_err();
            if sender.send(item).await.is_err() || terminal {
                break;
            }
        }
    }));

    while let Some(item) = receiver.recv().await {
        match item {
            Ok(item) => {
                let Some(value) = extract(item) else {
                    continue;
                };
                if !shared.deliver(|| observer.on_next(value)) {
                    return;
                }
            }
            Err(err) => {
                let err = match err {
                    ClientError::Subscription(_) => err,
                    other => ClientError::Subscription(other.to_string()),
                };
                warn!(
                    subscription_id = shared.id,
                    kind = shared.kind,
                    error = %err,
                    "Stream failed"
                );
                shared.terminate(SubscriptionState::Errored, || observer.on_error(err));
                return;
            }
        }
    }

    if shared.terminate(SubscriptionState::Completed, || observer.on_completed()) {
        debug!(subscription_id = shared.id, kind = shared.kind, "Stream closed by server");
    }
}
