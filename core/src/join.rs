//! Fan-in: merge several inputs into one output.
//!
//! [`Join::connect`] wraps the output in a [`JoinConnection`]; every call to
//! [`JoinConnection::branch`] opens one more input into the same output. A bounded join
//! refuses branches past its limit with [`StageError::TooManyConnections`].

use crate::connect::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer,
};
use crate::error::StageError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const STAGE: &str = "Join";

/// Connectable that merges any number of inputs into one output.
pub struct Join<T> {
    limit: Option<usize>,
    _item: PhantomData<fn(T)>,
}

impl<T> Join<T>
where
    T: 'static,
{
    /// Create an unbounded join.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limit: None,
            _item: PhantomData,
        }
    }

    /// Create a join that accepts at most `limit` inputs, counting the connection itself.
    #[must_use]
    pub const fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            _item: PhantomData,
        }
    }

    /// Connect `output` and return the concrete join connection.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::TooManyConnections`] when the join is bounded to zero inputs.
    pub fn connect_join(&self, output: SharedConsumer<T>) -> Result<Arc<JoinConnection<T>>, StageError> {
        if self.limit == Some(0) {
            return Err(StageError::TooManyConnections { limit: 0 });
        }
        Ok(Arc::new(JoinConnection {
            shared: Arc::new(JoinShared {
                output,
                disposed: AtomicBool::new(false),
                inputs: AtomicUsize::new(1),
                limit: self.limit,
            }),
        }))
    }
}

impl<T> Default for Join<T>
where
    T: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Join<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join").field("limit", &self.limit).finish()
    }
}

impl<T> Connectable<T, T> for Join<T>
where
    T: Send + 'static,
{
    fn connect(&self, output: SharedConsumer<T>) -> Result<SharedConnection<T>, StageError> {
        let connection: SharedConnection<T> = self.connect_join(output)?;
        Ok(connection)
    }
}

struct JoinShared<T> {
    output: SharedConsumer<T>,
    disposed: AtomicBool,
    inputs: AtomicUsize,
    limit: Option<usize>,
}

impl<T> JoinShared<T> {
    fn forward(&self, item: T) -> Result<(), StageError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }
        self.output.consume(item)
    }
}

/// A live fan-in. Itself an input, and the source of further inputs.
///
/// Disposing the join connection closes every branch.
pub struct JoinConnection<T> {
    shared: Arc<JoinShared<T>>,
}

impl<T> JoinConnection<T>
where
    T: Send + 'static,
{
    /// Open one more input into the joined output.
    ///
    /// # Errors
    ///
    /// - [`StageError::Disposed`] after the join connection was disposed
    /// - [`StageError::TooManyConnections`] when a bounded join is full
    pub fn branch(&self) -> Result<SharedConnection<T>, StageError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }

        let limit = self.shared.limit;
        let reserved = self
            .shared
            .inputs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| match limit {
                Some(limit) if count >= limit => None,
                _ => Some(count + 1),
            });
        if reserved.is_err() {
            return Err(StageError::TooManyConnections {
                limit: limit.unwrap_or(usize::MAX),
            });
        }

        Ok(Arc::new(JoinBranch {
            shared: Arc::clone(&self.shared),
            disposed: AtomicBool::new(false),
        }))
    }

    /// Number of inputs currently counted against the limit.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.shared.inputs.load(Ordering::Acquire)
    }
}

impl<T> Consumer<T> for JoinConnection<T>
where
    T: Send,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        self.shared.forward(item)
    }
}

impl<T> Disposable for JoinConnection<T>
where
    T: Send,
{
    fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for JoinConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinConnection")
            .field("inputs", &self.shared.inputs.load(Ordering::Acquire))
            .field("disposed", &self.shared.disposed.load(Ordering::Acquire))
            .finish()
    }
}

struct JoinBranch<T> {
    shared: Arc<JoinShared<T>>,
    disposed: AtomicBool,
}

impl<T> Consumer<T> for JoinBranch<T>
where
    T: Send,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }
        self.shared.forward(item)
    }
}

impl<T> Disposable for JoinBranch<T>
where
    T: Send,
{
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.shared.inputs.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
