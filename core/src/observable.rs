//! Broadcast to a set of subscribers that can change at runtime.

use crate::connect::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer,
};
use crate::error::StageError;
use arc_swap::ArcSwap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const STAGE: &str = "ObservableItems";

type Subscribers<T> = Vec<(u64, SharedConsumer<T>)>;

/// Connectable that builds [`ObservableConnection`]s.
pub struct ObservableItems<T> {
    _item: PhantomData<fn(T)>,
}

impl<T> ObservableItems<T>
where
    T: Clone + Send + 'static,
{
    /// Create a new broadcast stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _item: PhantomData }
    }

    /// Connect `output` and return the concrete connection, so subscribers can be added.
    ///
    /// `output` receives every item first; runtime subscribers see it afterwards.
    #[must_use]
    pub fn connect_observable(&self, output: SharedConsumer<T>) -> Arc<ObservableConnection<T>> {
        Arc::new(ObservableConnection {
            output,
            subscribers: Arc::new(ArcSwap::from_pointee(Vec::new())),
            next_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })
    }
}

impl<T> Default for ObservableItems<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObservableItems<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObservableItems")
    }
}

impl<T> Connectable<T, T> for ObservableItems<T>
where
    T: Clone + Send + 'static,
{
    fn connect(&self, output: SharedConsumer<T>) -> Result<SharedConnection<T>, StageError> {
        Ok(self.connect_observable(output))
    }
}

/// A live broadcaster.
///
/// Each `consume()` delivers to a snapshot of the subscriber set taken when the call starts.
/// Subscribing or unsubscribing while a broadcast is running only affects later broadcasts.
pub struct ObservableConnection<T> {
    output: SharedConsumer<T>,
    subscribers: Arc<ArcSwap<Subscribers<T>>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl<T> ObservableConnection<T>
where
    T: Clone + Send + 'static,
{
    /// Add a subscriber. Dispose the returned [`Subscription`] to remove it again.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Disposed`] after the connection was disposed.
    pub fn observe(&self, consumer: SharedConsumer<T>) -> Result<Subscription<T>, StageError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push((id, Arc::clone(&consumer)));
            next
        });

        Ok(Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            removed: AtomicBool::new(false),
        })
    }

    /// Number of runtime subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

impl<T> Consumer<T> for ObservableConnection<T>
where
    T: Clone + Send + 'static,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }

        let snapshot = self.subscribers.load_full();
        let mut first_error = self.output.consume(item.clone()).err();

        for (id, subscriber) in snapshot.iter() {
            if let Err(error) = subscriber.consume(item.clone()) {
                tracing::warn!(subscriber = id, error = %error, "Subscriber refused item");
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl<T> Disposable for ObservableConnection<T>
where
    T: Send,
{
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for ObservableConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableConnection")
            .field("subscribers", &self.subscribers.load().len())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

/// Token returned by [`ObservableConnection::observe`].
///
/// Disposing it removes the subscriber. It does not keep the connection alive.
pub struct Subscription<T> {
    id: u64,
    subscribers: Weak<ArcSwap<Subscribers<T>>>,
    removed: AtomicBool,
}

impl<T> Disposable for Subscription<T>
where
    T: Send,
{
    fn dispose(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.rcu(|current| {
                current
                    .iter()
                    .filter(|(id, _)| *id != self.id)
                    .cloned()
                    .collect::<Subscribers<T>>()
            });
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
