//! Fan-out: broadcast every item to a fixed list of outputs.
//!
//! A split connection has a build phase and a broadcast phase. Outputs are attached with
//! [`SplitConnection::connect`] while it is initialising; the first `consume()` locks the list
//! in and every later `connect()` fails.
//!
//! Disposal is local: it stops the split from accepting items and outputs, but the attached
//! outputs are left alone. Whoever connected them owns them.

use crate::connect::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer,
};
use crate::error::StageError;
use arc_swap::ArcSwap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const STAGE: &str = "Split";

const INITIALISING: u8 = 0;
const ACTIVE: u8 = 1;
const DISPOSED: u8 = 2;

/// Connectable that builds [`SplitConnection`]s.
pub struct Split<T> {
    _item: PhantomData<fn(T)>,
}

impl<T> Split<T>
where
    T: Clone + 'static,
{
    /// Create a new fan-out stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { _item: PhantomData }
    }

    /// Connect the first output and return the concrete split connection, so further
    /// outputs can be attached to it.
    #[must_use]
    pub fn connect_split(&self, output: SharedConsumer<T>) -> Arc<SplitConnection<T>> {
        Arc::new(SplitConnection {
            phase: AtomicU8::new(INITIALISING),
            outputs: ArcSwap::from_pointee(vec![output]),
        })
    }
}

impl<T> Default for Split<T>
where
    T: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Split<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Split")
    }
}

impl<T> Connectable<T, T> for Split<T>
where
    T: Clone + Send + 'static,
{
    fn connect(&self, output: SharedConsumer<T>) -> Result<SharedConnection<T>, StageError> {
        Ok(self.connect_split(output))
    }
}

/// A live fan-out.
///
/// Items are forwarded to every output in the order the outputs were attached. Attaching
/// outputs from several threads at once is not supported; the output list is only guarded
/// against a concurrent `consume()`.
pub struct SplitConnection<T> {
    phase: AtomicU8,
    outputs: ArcSwap<Vec<SharedConsumer<T>>>,
}

impl<T> SplitConnection<T>
where
    T: Clone + 'static,
{
    /// Attach one more output. Returns this same connection.
    ///
    /// # Errors
    ///
    /// - [`StageError::ConnectionsLocked`] once the first item has been consumed
    /// - [`StageError::Disposed`] after `dispose()`
    pub fn connect(self: &Arc<Self>, output: SharedConsumer<T>) -> Result<Arc<Self>, StageError> {
        match self.phase.load(Ordering::Acquire) {
            INITIALISING => {},
            ACTIVE => return Err(StageError::ConnectionsLocked),
            _ => return Err(StageError::disposed(STAGE)),
        }

        self.outputs.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&output));
            next
        });

        Ok(Arc::clone(self))
    }

    /// Number of attached outputs.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.outputs.load().len()
    }

    fn activate(&self) -> Result<(), StageError> {
        let mut phase = self.phase.load(Ordering::Acquire);
        loop {
            match phase {
                ACTIVE => return Ok(()),
                INITIALISING => {},
                _ => return Err(StageError::disposed(STAGE)),
            }
            match self.phase.compare_exchange_weak(
                phase,
                ACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::trace!(outputs = self.output_count(), "Split locked in its outputs");
                    return Ok(());
                },
                Err(actual) => phase = actual,
            }
        }
    }
}

impl<T> Consumer<T> for SplitConnection<T>
where
    T: Clone + Send + 'static,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        self.activate()?;

        let outputs = self.outputs.load_full();
        if let Some((last, rest)) = outputs.split_last() {
            for output in rest {
                output.consume(item.clone())?;
            }
            last.consume(item)?;
        }
        Ok(())
    }
}

impl<T> Disposable for SplitConnection<T>
where
    T: Send,
{
    fn dispose(&self) {
        self.phase.store(DISPOSED, Ordering::Release);
    }
}

impl<T> fmt::Debug for SplitConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase.load(Ordering::Acquire) {
            INITIALISING => "initialising",
            ACTIVE => "active",
            _ => "disposed",
        };
        f.debug_struct("SplitConnection")
            .field("phase", &phase)
            .field("outputs", &self.outputs.load().len())
            .finish()
    }
}
