//! Fan-out of entity events to subscribers.
//!
//! Every subscriber owns a bounded queue. [`Broker::publish`] waits
//! while a subscriber's queue is full instead of dropping the event,
//! so each subscriber observes every event in publish order.
//!
//! ```text
//!                 publish(kind, payload)
//!                          │
//!              ┌───────────┴────────────┐
//!              │  subscribers (locked)   │
//!              └───┬─────────┬──────────┘
//!                  ▼         ▼
//!             [ queue ]  [ queue ]    bounded, block on full
//!                  │         │
//!                  ▼         ▼
//!            Subscription  Subscription
//! ```
//!
//! The subscriber list is held locked for the whole delivery. This
//! serializes concurrent publishers into one total order and lets
//! [`Broker::shutdown`] wait for in-flight deliveries by acquiring the
//! same lock.
//!
//! # Contract
//!
//! A subscriber must not publish to the broker it is draining while its
//! own queue is full. Consumers that need to publish in response to an
//! event hand the work to a separate task.

use crate::event::{Event, EventKind};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Default per-subscriber queue capacity.
pub const DEFAULT_BUFFER: usize = 100;

struct Subscriber<T> {
    tx: mpsc::Sender<Event<T>>,
    token: CancellationToken,
}

struct Inner<T> {
    subscribers: Vec<Subscriber<T>>,
    closed: bool,
}

/// A bounded, block-sender pub/sub broker.
///
/// # Example
///
/// ```
/// use pug_event::{Broker, EventKind};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test_block_on(async {
/// let broker: Broker<u32> = Broker::new(8);
/// let mut sub = broker.subscribe(CancellationToken::new()).await;
///
/// broker.publish(EventKind::Created, 1).await;
/// let ev = sub.recv().await.unwrap();
/// assert_eq!(ev.payload, 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct Broker<T> {
    inner: Mutex<Inner<T>>,
    buffer: usize,
}

impl<T: Clone + Send + 'static> Broker<T> {
    /// Creates a broker whose subscriber queues hold `buffer` events.
    ///
    /// A zero buffer is raised to one.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                closed: false,
            }),
            buffer: buffer.max(1),
        }
    }

    /// Returns the per-subscriber queue capacity.
    #[must_use]
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Registers a subscriber.
    ///
    /// Cancelling `token` ends the subscription: the broker forgets it on
    /// its next publish and [`Subscription::recv`] returns `None`. A
    /// subscription taken after [`Broker::shutdown`] is already closed.
    pub async fn subscribe(&self, token: CancellationToken) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock().await;
        if !inner.closed {
            inner.subscribers.push(Subscriber {
                tx,
                token: token.clone(),
            });
        }
        Subscription { rx, token }
    }

    /// Delivers an event to every live subscriber.
    ///
    /// Waits while any subscriber's queue is full. Subscribers whose
    /// token is cancelled or whose [`Subscription`] was dropped are
    /// removed. Publishing after shutdown is a no-op.
    pub async fn publish(&self, kind: EventKind, payload: T) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            tracing::trace!(%kind, "publish after broker shutdown ignored");
            return;
        }

        let event = Event::new(kind, payload);
        let mut live = Vec::with_capacity(inner.subscribers.len());
        for sub in inner.subscribers.drain(..) {
            if sub.token.is_cancelled() {
                continue;
            }
            let delivered = tokio::select! {
                biased;
                _ = sub.token.cancelled() => false,
                res = sub.tx.send(event.clone()) => res.is_ok(),
            };
            if delivered {
                live.push(sub);
            }
        }
        inner.subscribers = live;
    }

    /// Returns the number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Waits for in-flight deliveries, then closes every subscriber
    /// channel. Events already queued remain readable.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        let n = inner.subscribers.len();
        inner.subscribers.clear();
        tracing::debug!(subscribers = n, "broker shut down");
    }

    /// Returns `true` once [`Broker::shutdown`] has run.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl<T> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

/// Receiving end of a broker subscription.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Event<T>>,
    token: CancellationToken,
}

impl<T> Subscription<T> {
    /// Receives the next event.
    ///
    /// Returns `None` once the subscription is cancelled, or once the
    /// broker has shut down and every queued event has been read.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            ev = self.rx.recv() => ev,
        }
    }

    /// Receives an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event<T>> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Ends the subscription.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the token bound to this subscription.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
