//! Capability traits every stage is built from.
//!
//! A pipeline is assembled back to front: each [`Connectable`] is handed the downstream
//! [`Consumer`] and returns the upstream [`Connection`] that feeds it. The caller of
//! `connect()` owns the returned connection and is responsible for disposing it.

use crate::error::StageError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Accepts one value at a time.
///
/// Implementations are shared between threads, so `consume` takes `&self` and any mutable
/// state lives behind atomics or cells.
pub trait Consumer<T>: Send + Sync {
    /// Accept one item.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the consumer is not in a state that accepts items
    /// (not yet started, disposed) or when a synchronous downstream stage refused the item.
    fn consume(&self, item: T) -> Result<(), StageError>;
}

/// Releases resources exactly once. Repeated calls are no-ops.
pub trait Disposable: Send + Sync {
    /// Release the resources held by this value.
    fn dispose(&self);
}

/// A live, disposable consumer.
pub trait Connection<T>: Consumer<T> + Disposable {}

impl<T, C> Connection<T> for C where C: Consumer<T> + Disposable + ?Sized {}

/// Shared handle to a consumer.
pub type SharedConsumer<T> = Arc<dyn Consumer<T>>;

/// Shared handle to a connection.
pub type SharedConnection<T> = Arc<dyn Connection<T>>;

/// View a shared connection as a plain consumer without giving up ownership of it.
#[must_use]
pub fn as_consumer<T: 'static>(connection: &SharedConnection<T>) -> SharedConsumer<T> {
    Arc::new(Arc::clone(connection))
}

/// Builds an upstream connection around a downstream consumer.
pub trait Connectable<In, Out>: Send + Sync {
    /// Connect `output` as the downstream of a new connection.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the stage cannot accept another output, for example a
    /// fan-out that has started broadcasting or a bounded fan-in that is full.
    fn connect(&self, output: SharedConsumer<Out>) -> Result<SharedConnection<In>, StageError>;
}

impl<T, C> Consumer<T> for Arc<C>
where
    C: Consumer<T> + ?Sized,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        (**self).consume(item)
    }
}

impl<C> Disposable for Arc<C>
where
    C: Disposable + ?Sized,
{
    fn dispose(&self) {
        (**self).dispose();
    }
}

/// Consumer backed by a closure. Built with [`consumer_fn`].
pub struct FnConsumer<T, F> {
    f: F,
    _item: PhantomData<fn(T)>,
}

impl<T, F> Consumer<T> for FnConsumer<T, F>
where
    F: Fn(T) -> Result<(), StageError> + Send + Sync,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        (self.f)(item)
    }
}

impl<T, F> fmt::Debug for FnConsumer<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnConsumer")
    }
}

/// Adapt a closure into a shared consumer.
///
/// # Example
///
/// ```
/// use loopwire_core::connect::{consumer_fn, Consumer};
///
/// let printer = consumer_fn(|line: String| {
///     println!("{line}");
///     Ok(())
/// });
/// printer.consume("hello".to_string()).unwrap();
/// ```
pub fn consumer_fn<T, F>(f: F) -> SharedConsumer<T>
where
    T: 'static,
    F: Fn(T) -> Result<(), StageError> + Send + Sync + 'static,
{
    Arc::new(FnConsumer {
        f,
        _item: PhantomData,
    })
}

/// Connection whose `dispose()` does nothing.
///
/// Wraps stateless consumers that have nothing to release.
pub struct IgnoreDispose<T> {
    consumer: SharedConsumer<T>,
}

impl<T> IgnoreDispose<T> {
    /// Wrap `consumer` as a connection.
    #[must_use]
    pub fn new(consumer: SharedConsumer<T>) -> Self {
        Self { consumer }
    }
}

impl<T> Consumer<T> for IgnoreDispose<T> {
    fn consume(&self, item: T) -> Result<(), StageError> {
        self.consumer.consume(item)
    }
}

impl<T> Disposable for IgnoreDispose<T> {
    fn dispose(&self) {}
}

impl<T> fmt::Debug for IgnoreDispose<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IgnoreDispose")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_consumer_fn_forwards_items() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer = consumer_fn(move |item: u32| {
            sink.lock().unwrap().push(item);
            Ok(())
        });

        consumer.consume(1).unwrap();
        consumer.consume(2).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_ignore_dispose_keeps_consuming() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connection = IgnoreDispose::new(consumer_fn(move |item: &'static str| {
            sink.lock().unwrap().push(item);
            Ok(())
        }));

        connection.dispose();
        connection.consume("still here").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["still here"]);
    }
}
