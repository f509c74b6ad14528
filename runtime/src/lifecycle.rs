//! Admission control for a loop.
//!
//! The [`LifecycleManager`] sits in front of a loop's pipeline and decides what happens to
//! every incoming event, depending on where the pipeline is in its life:
//!
//! ```text
//! Uninitialized --start()--> Queuing --pipeline built--> Active --dispose()--> Stopping --> Stopped
//! ```
//!
//! - `Uninitialized`: events are refused, the pipeline does not exist yet.
//! - `Queuing`: the pipeline is being built. Events are buffered in FIFO order.
//! - `Active`: events go to the pipeline. The buffer is drained first.
//! - `Stopping`: disposal is in progress. Events are dropped without error.
//! - `Stopped`: events are refused.
//!
//! The pipeline is built by a [`LoopFactory`] that receives a forwarding consumer pointing back
//! at the manager. Stages inside the pipeline that feed events back into the loop (effects,
//! the event source) are wired against that consumer before the pipeline itself exists.
//!
//! All phase changes are compare-and-swap or swap operations on one [`ArcSwap`] cell. Buffered
//! events live in a lock-free queue that is drained by at most one thread at a time.

use crate::metrics::{EVENTS_DROPPED, EVENTS_QUEUED, LIFECYCLE_DISPOSED};
use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use loopwire_core::{Consumer, Disposable, SharedConnection, SharedConsumer, StageError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

const STAGE: &str = "LifecycleManager";

/// Builds the pipeline a lifecycle manager forwards to.
///
/// The argument is the consumer that feeds events back into the manager. Stages that produce
/// events of their own connect their output to it.
pub type LoopFactory<E> =
    Box<dyn FnOnce(SharedConsumer<E>) -> Result<SharedConnection<E>, StageError> + Send>;

/// Observable phase of a [`LifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// `start()` has not been called
    Uninitialized,
    /// The pipeline is being built; events are buffered
    Queuing,
    /// Events are forwarded to the pipeline
    Active,
    /// Disposal in progress; events are dropped
    Stopping,
    /// Fully disposed
    Stopped,
}

enum Phase<E> {
    Uninitialized,
    Queuing,
    Active(SharedConnection<E>),
    Stopping,
    Stopped,
}

impl<E> Phase<E> {
    const fn public(&self) -> LifecyclePhase {
        match self {
            Self::Uninitialized => LifecyclePhase::Uninitialized,
            Self::Queuing => LifecyclePhase::Queuing,
            Self::Active(_) => LifecyclePhase::Active,
            Self::Stopping => LifecyclePhase::Stopping,
            Self::Stopped => LifecyclePhase::Stopped,
        }
    }
}

/// Admission-control state machine in front of a loop's pipeline.
///
/// # Example
///
/// ```
/// use loopwire_core::connect::{consumer_fn, Consumer, Disposable, IgnoreDispose};
/// use loopwire_runtime::lifecycle::{LifecycleManager, LifecyclePhase};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// let manager = LifecycleManager::new(
///     "example",
///     CancellationToken::new(),
///     |_input| {
///         Ok(Arc::new(IgnoreDispose::new(consumer_fn(|event: u32| {
///             println!("event {event}");
///             Ok(())
///         }))))
///     },
/// );
///
/// assert!(manager.consume(1).is_err());
/// manager.start().unwrap();
/// manager.consume(2).unwrap();
/// manager.dispose();
/// assert_eq!(manager.phase(), LifecyclePhase::Stopped);
/// ```
pub struct LifecycleManager<E> {
    name: String,
    phase: ArcSwap<Phase<E>>,
    backlog: SegQueue<E>,
    draining: AtomicBool,
    scope: CancellationToken,
    factory: Mutex<Option<LoopFactory<E>>>,
}

impl<E> LifecycleManager<E>
where
    E: Send + 'static,
{
    /// Create a manager in the `Uninitialized` phase.
    ///
    /// `scope` is the cancellation scope the manager owns; it is cancelled exactly once, by
    /// the caller that wins the dispose race.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, scope: CancellationToken, factory: F) -> Arc<Self>
    where
        F: FnOnce(SharedConsumer<E>) -> Result<SharedConnection<E>, StageError> + Send + 'static,
    {
        let factory: LoopFactory<E> = Box::new(factory);
        Arc::new(Self {
            name: name.into(),
            phase: ArcSwap::from_pointee(Phase::Uninitialized),
            backlog: SegQueue::new(),
            draining: AtomicBool::new(false),
            scope,
            factory: Mutex::new(Some(factory)),
        })
    }

    /// Build the pipeline and start forwarding events to it.
    ///
    /// Events that arrive while the pipeline is being built are delivered to it afterwards,
    /// in arrival order. If the manager is disposed while the factory runs, the freshly built
    /// pipeline is disposed straight away.
    ///
    /// # Errors
    ///
    /// - [`StageError::AlreadyStarted`] if `start()` was called before.
    /// - [`StageError::Disposed`] if the manager was disposed before it was started.
    /// - Any error returned by the factory. The manager is disposed in that case.
    pub fn start(self: &Arc<Self>) -> Result<(), StageError> {
        let current = self.phase.load_full();
        match *current {
            Phase::Uninitialized => {},
            Phase::Queuing | Phase::Active(_) => return Err(StageError::AlreadyStarted),
            Phase::Stopping | Phase::Stopped => return Err(StageError::disposed(STAGE)),
        }

        let queuing = Arc::new(Phase::Queuing);
        let previous = self.phase.compare_and_swap(&current, Arc::clone(&queuing));
        if !Arc::ptr_eq(&*previous, &current) {
            return match **previous {
                Phase::Stopping | Phase::Stopped => Err(StageError::disposed(STAGE)),
                _ => Err(StageError::AlreadyStarted),
            };
        }
        tracing::debug!(manager = %self.name, "Lifecycle manager queuing");

        let factory = self
            .factory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(factory) = factory else {
            return Err(StageError::AlreadyStarted);
        };

        let input: SharedConsumer<E> = Arc::new(ManagerInput {
            manager: Arc::downgrade(self),
        });
        let delegate = match factory(input) {
            Ok(delegate) => delegate,
            Err(error) => {
                tracing::warn!(manager = %self.name, error = %error, "Pipeline construction failed");
                self.dispose();
                return Err(error);
            },
        };

        let active = Arc::new(Phase::Active(Arc::clone(&delegate)));
        let previous = self.phase.compare_and_swap(&queuing, active);
        if !Arc::ptr_eq(&*previous, &queuing) {
            tracing::debug!(manager = %self.name, "Disposed while starting; releasing pipeline");
            delegate.dispose();
            return Ok(());
        }
        tracing::debug!(manager = %self.name, "Lifecycle manager active");

        self.drain();
        Ok(())
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.phase.load().public()
    }

    /// Cancellation scope owned by this manager.
    #[must_use]
    pub const fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward buffered events while the manager is active.
    ///
    /// Only one thread drains at a time. After releasing the drain flag the queue is checked
    /// again, so an event pushed by a caller that lost the race for the flag is never stranded.
    fn drain(&self) {
        loop {
            let phase = self.phase.load_full();
            let Phase::Active(delegate) = &*phase else {
                return;
            };
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            while let Some(event) = self.backlog.pop() {
                if let Err(error) = delegate.consume(event) {
                    tracing::warn!(manager = %self.name, error = %error, "Pipeline refused buffered event");
                }
            }

            self.draining.store(false, Ordering::SeqCst);
            if self.backlog.is_empty() {
                return;
            }
        }
    }
}

impl<E> Consumer<E> for LifecycleManager<E>
where
    E: Send + 'static,
{
    fn consume(&self, event: E) -> Result<(), StageError> {
        let phase = self.phase.load_full();
        match &*phase {
            Phase::Uninitialized => Err(StageError::NotStarted),
            Phase::Queuing => {
                self.backlog.push(event);
                metrics::counter!(EVENTS_QUEUED).increment(1);
                // start() may have switched to Active between the load and the push.
                self.drain();
                Ok(())
            },
            Phase::Active(delegate) => {
                // Popped events are only released after they were forwarded, so an empty
                // queue with nobody draining means every earlier event has been delivered.
                if self.backlog.is_empty() && !self.draining.load(Ordering::SeqCst) {
                    delegate.consume(event)
                } else {
                    self.backlog.push(event);
                    self.drain();
                    Ok(())
                }
            },
            Phase::Stopping => {
                tracing::trace!(manager = %self.name, "Dropping event while stopping");
                metrics::counter!(EVENTS_DROPPED).increment(1);
                Ok(())
            },
            Phase::Stopped => Err(StageError::disposed(STAGE)),
        }
    }
}

impl<E> Disposable for LifecycleManager<E>
where
    E: Send + 'static,
{
    fn dispose(&self) {
        if matches!(**self.phase.load(), Phase::Stopped) {
            return;
        }

        let previous = self.phase.swap(Arc::new(Phase::Stopping));
        if matches!(*previous, Phase::Stopped) {
            self.phase.store(previous);
            return;
        }
        match &*previous {
            Phase::Stopping | Phase::Stopped => return,
            Phase::Active(delegate) => delegate.dispose(),
            Phase::Uninitialized | Phase::Queuing => {},
        }
        tracing::debug!(manager = %self.name, from = ?previous.public(), "Lifecycle manager stopping");

        while self.backlog.pop().is_some() {
            metrics::counter!(EVENTS_DROPPED).increment(1);
        }
        self.factory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.scope.cancel();

        self.phase.store(Arc::new(Phase::Stopped));
        metrics::counter!(LIFECYCLE_DISPOSED).increment(1);
        tracing::debug!(manager = %self.name, "Lifecycle manager stopped");
    }
}

impl<E> fmt::Debug for LifecycleManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("name", &self.name)
            .field("phase", &self.phase.load().public())
            .field("buffered", &self.backlog.len())
            .finish_non_exhaustive()
    }
}

/// Consumer handed to the loop factory. Holds the manager weakly so the pipeline it feeds
/// does not keep the manager alive.
struct ManagerInput<E> {
    manager: Weak<LifecycleManager<E>>,
}

impl<E> Consumer<E> for ManagerInput<E>
where
    E: Send + 'static,
{
    fn consume(&self, event: E) -> Result<(), StageError> {
        self.manager
            .upgrade()
            .ok_or(StageError::disposed(STAGE))?
            .consume(event)
    }
}
