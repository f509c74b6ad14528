//! Sequential reducer stage.
//!
//! A state holder connection owns one accumulated model. Every `consume(event)` folds the
//! event into the model and passes the new model downstream before returning, so the models
//! emitted are exactly the running left-fold of the update function over the events.
//!
//! Callers must not overlap `consume()` calls on one connection; put a single-worker stage in
//! front of it. An overlap is detected and refused with [`StageError::ConcurrentConsume`]
//! rather than silently interleaving two folds.

use crate::connect::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer,
};
use crate::error::StageError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

const STAGE: &str = "StateHolder";

/// Connectable that folds events into a model.
///
/// # Example
///
/// ```
/// use loopwire_core::connect::{consumer_fn, Connectable, Consumer};
/// use loopwire_core::state_holder::StateHolder;
///
/// let counter = StateHolder::new(|count: &u32, step: u32| count + step, 0);
/// let connection = counter
///     .connect(consumer_fn(|count: u32| {
///         println!("count is now {count}");
///         Ok(())
///     }))
///     .unwrap();
/// connection.consume(2).unwrap();
/// ```
pub struct StateHolder<E, M, F> {
    update: Arc<F>,
    initial: M,
    _event: PhantomData<fn(E)>,
}

impl<E, M, F> StateHolder<E, M, F>
where
    M: Clone + Send + 'static,
    F: Fn(&M, E) -> M + Send + Sync + 'static,
{
    /// Create a state holder with an update function and the model every connection starts
    /// from.
    #[must_use]
    pub fn new(update: F, initial: M) -> Self {
        Self {
            update: Arc::new(update),
            initial,
            _event: PhantomData,
        }
    }
}

impl<E, M, F> Connectable<E, M> for StateHolder<E, M, F>
where
    E: 'static,
    M: Clone + Send + Sync + 'static,
    F: Fn(&M, E) -> M + Send + Sync + 'static,
{
    fn connect(&self, output: SharedConsumer<M>) -> Result<SharedConnection<E>, StageError> {
        Ok(Arc::new(StateHolderConnection {
            update: Arc::clone(&self.update),
            model: Mutex::new(self.initial.clone()),
            output,
            disposed: AtomicBool::new(false),
            _event: PhantomData,
        }))
    }
}

impl<E, M, F> fmt::Debug for StateHolder<E, M, F>
where
    M: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHolder")
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

struct StateHolderConnection<E, M, F> {
    update: Arc<F>,
    model: Mutex<M>,
    output: SharedConsumer<M>,
    disposed: AtomicBool,
    _event: PhantomData<fn(E)>,
}

impl<E, M, F> Consumer<E> for StateHolderConnection<E, M, F>
where
    M: Clone + Send,
    F: Fn(&M, E) -> M + Send + Sync,
{
    fn consume(&self, event: E) -> Result<(), StageError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StageError::disposed(STAGE));
        }

        let next = {
            let mut model = match self.model.try_lock() {
                Ok(model) => model,
                Err(TryLockError::WouldBlock) => {
                    return Err(StageError::ConcurrentConsume { stage: STAGE });
                },
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            *model = (self.update)(&model, event);
            model.clone()
        };

        self.output.consume(next)
    }
}

impl<E, M, F> Disposable for StateHolderConnection<E, M, F>
where
    M: Send,
    F: Send + Sync,
{
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}
