//! Execution hand-off: move consumption onto a dedicated single worker.
//!
//! Every connection gets its own runner from the factory, indexed by a counter that grows
//! with each `connect()`. Items are resubmitted to that runner, so the downstream consumer
//! sees them one at a time, in submission order, never from two threads at once.

use crate::runner::{Runner, RunnerFactory};
use loopwire_core::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer, StageError,
};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Connectable that serializes each connection onto its own worker.
pub struct SwitchToContext<T> {
    factory: Arc<dyn RunnerFactory>,
    connections: AtomicUsize,
    _item: PhantomData<fn(T)>,
}

impl<T> SwitchToContext<T>
where
    T: Send + 'static,
{
    /// Create the stage with the factory that builds one runner per connection.
    #[must_use]
    pub fn new(factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            factory,
            connections: AtomicUsize::new(0),
            _item: PhantomData,
        }
    }
}

impl<T> Connectable<T, T> for SwitchToContext<T>
where
    T: Send + 'static,
{
    fn connect(&self, output: SharedConsumer<T>) -> Result<SharedConnection<T>, StageError> {
        let index = self.connections.fetch_add(1, Ordering::Relaxed);
        let runner = self.factory.create(index)?;
        tracing::debug!(runner = runner.name(), index, "SwitchToContext connected");

        Ok(Arc::new(SwitchToContextConnection { runner, output }))
    }
}

impl<T> fmt::Debug for SwitchToContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchToContext")
            .field("connections", &self.connections.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct SwitchToContextConnection<T> {
    runner: Arc<dyn Runner>,
    output: SharedConsumer<T>,
}

impl<T> Consumer<T> for SwitchToContextConnection<T>
where
    T: Send + 'static,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        let output = Arc::clone(&self.output);
        let runner = Arc::clone(&self.runner);
        self.runner.submit(Box::new(move || {
            match output.consume(item) {
                Ok(()) => {},
                Err(StageError::Disposed { stage }) => {
                    tracing::trace!(runner = runner.name(), stage, "Dropped item for disposed stage");
                },
                Err(error) => {
                    tracing::warn!(runner = runner.name(), error = %error, "Downstream refused item");
                },
            }
        }))
    }
}

impl<T> Disposable for SwitchToContextConnection<T>
where
    T: Send,
{
    fn dispose(&self) {
        self.runner.close();
    }
}
