//! The assembled event loop.
//!
//! An [`EventLoop`] wires an update function, an effect handler and an event source into one
//! closed graph behind a [`LifecycleManager`]:
//!
//! ```text
//!                 +--------------------------------------------------------------+
//!                 v                                                              |
//! dispatch --> manager --> worker --> state --> split --+--> effects --> handler --+
//!                                                       |                          |
//!                                                       +--> models --> observers  |
//!                                                                   \--> source ---+
//! ```
//!
//! Every event, wherever it comes from, is funnelled through one dedicated worker before it
//! reaches the update function, so updates never overlap. Effects run as tokio tasks under
//! the loop's cancellation scope; the events they produce re-enter through the manager.

use crate::config::LoopConfig;
use crate::flat_map::FlatMapFlow;
use crate::lifecycle::{LifecycleManager, LifecyclePhase};
use crate::metrics::{describe as describe_metrics, EVENTS_DISPATCHED};
use crate::runner::{NamedThreadRunnerFactory, RunnerFactory};
use crate::switch_context::SwitchToContext;
use arc_swap::ArcSwapOption;
use futures::stream::BoxStream;
use loopwire_core::{
    as_consumer, consumer_fn, Connectable, Consumer, Disposable, IgnoreDispose, Join, Map, Next,
    ObservableConnection, ObservableItems, SharedConnection, SharedConsumer, Split, StageError,
    StateHolder, Subscription,
};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// A running update/effect loop.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use loopwire_core::{consumer_fn, Next};
/// use loopwire_runtime::event_loop::{EventLoop, NoEventSource};
///
/// # #[tokio::main]
/// # async fn main() {
/// let counter = EventLoop::new(
///     "counter",
///     |count: &u32, step: u32| Next::<u32, ()>::model(count + step),
///     |(): ()| futures::stream::empty().boxed(),
///     NoEventSource,
///     0,
/// )
/// .unwrap();
///
/// let _subscription = counter
///     .observe(consumer_fn(|count: u32| {
///         println!("count is {count}");
///         Ok(())
///     }))
///     .unwrap();
/// counter.dispatch_event(1).unwrap();
/// counter.dispose();
/// # }
/// ```
pub struct EventLoop<M, E>
where
    E: Send + 'static,
{
    name: String,
    manager: Arc<LifecycleManager<E>>,
    observable: Arc<OnceLock<Arc<ObservableConnection<M>>>>,
    most_recent: Arc<ArcSwapOption<M>>,
}

impl<M, E> EventLoop<M, E>
where
    M: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Build and start a loop with the default configuration.
    ///
    /// Must be called from within a tokio runtime; effects are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Runner`] when there is no ambient tokio runtime or the update
    /// worker cannot be created, and any error the event source returns from `connect()`.
    pub fn new<U, H, F, S>(
        name: impl Into<String>,
        update: U,
        effect_handler: H,
        event_source: S,
        initial: M,
    ) -> Result<Self, StageError>
    where
        U: Fn(&M, E) -> Next<M, F> + Send + Sync + 'static,
        H: Fn(F) -> BoxStream<'static, E> + Send + Sync + 'static,
        F: Clone + Eq + Hash + Send + Sync + 'static,
        S: Connectable<M, E> + 'static,
    {
        Self::with_config(
            name,
            update,
            effect_handler,
            event_source,
            initial,
            LoopConfig::default(),
        )
    }

    /// Build and start a loop with a custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`EventLoop::new`]. No ambient runtime is needed when the configuration
    /// carries a handle.
    #[tracing::instrument(level = "info", skip_all, fields(loop_name))]
    pub fn with_config<U, H, F, S>(
        name: impl Into<String>,
        update: U,
        effect_handler: H,
        event_source: S,
        initial: M,
        config: LoopConfig,
    ) -> Result<Self, StageError>
    where
        U: Fn(&M, E) -> Next<M, F> + Send + Sync + 'static,
        H: Fn(F) -> BoxStream<'static, E> + Send + Sync + 'static,
        F: Clone + Eq + Hash + Send + Sync + 'static,
        S: Connectable<M, E> + 'static,
    {
        let name = name.into();
        tracing::Span::current().record("loop_name", name.as_str());
        describe_metrics();

        let handle = match config.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|error| StageError::Runner(error.to_string()))?,
        };
        let scope = config
            .parent_scope
            .map_or_else(CancellationToken::new, |parent| parent.child_token());
        let runner_factory = config.runner_factory.unwrap_or_else(|| {
            let loop_name = name.clone();
            Arc::new(NamedThreadRunnerFactory::new(move |index| {
                format!("Event Runner ({loop_name}:{index})")
            })) as Arc<dyn RunnerFactory>
        });

        let observable = Arc::new(OnceLock::new());
        let most_recent = Arc::new(ArcSwapOption::empty());
        let wiring = Wiring {
            handle,
            scope: scope.clone(),
            runner_factory,
            update,
            effect_handler,
            event_source,
            initial,
            observable: Arc::clone(&observable),
            most_recent: Arc::clone(&most_recent),
            _effect: PhantomData,
        };

        let manager = LifecycleManager::new(name.clone(), scope, move |input| wiring.build(input));
        manager.start()?;
        tracing::info!(loop_name = %name, "Event loop started");

        Ok(Self {
            name,
            manager,
            observable,
            most_recent,
        })
    }

    /// Inject an event. Safe to call from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Disposed`] after the loop was disposed.
    #[tracing::instrument(level = "trace", skip_all, fields(loop_name = %self.name))]
    pub fn dispatch_event(&self, event: E) -> Result<(), StageError> {
        metrics::counter!(EVENTS_DISPATCHED).increment(1);
        self.manager.consume(event)
    }

    /// Subscribe to model updates. Dispose the returned subscription to stop observing.
    ///
    /// Observers see every model produced after they subscribed, in order, on the loop's
    /// worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Disposed`] after the loop was disposed.
    pub fn observe(&self, observer: SharedConsumer<M>) -> Result<Subscription<M>, StageError> {
        if self.manager.phase() != LifecyclePhase::Active {
            return Err(StageError::disposed("EventLoop"));
        }
        self.observable
            .get()
            .ok_or(StageError::disposed("EventLoop"))?
            .observe(observer)
    }

    /// The last model broadcast by the loop, if any event has been processed.
    #[must_use]
    pub fn most_recent_model(&self) -> Option<M> {
        self.most_recent.load_full().map(|model| (*model).clone())
    }

    /// Name of the loop, as given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.manager.phase()
    }

    /// Stop the loop: refuse further events, cancel running effects, shut the worker down.
    ///
    /// Idempotent.
    #[tracing::instrument(level = "info", skip_all, fields(loop_name = %self.name))]
    pub fn dispose(&self) {
        if self.manager.phase() == LifecyclePhase::Stopped {
            return;
        }
        self.manager.dispose();
        tracing::info!("Event loop disposed");
    }
}

impl<M, E> Drop for EventLoop<M, E>
where
    E: Send + 'static,
{
    fn drop(&mut self) {
        self.manager.dispose();
    }
}

impl<M, E> fmt::Debug for EventLoop<M, E>
where
    E: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Event source that never produces events and ignores models.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEventSource;

impl<M, E> Connectable<M, E> for NoEventSource
where
    M: 'static,
    E: 'static,
{
    fn connect(&self, _output: SharedConsumer<E>) -> Result<SharedConnection<M>, StageError> {
        Ok(Arc::new(IgnoreDispose::new(consumer_fn(|_: M| Ok(())))))
    }
}

/// Everything the loop factory needs to build the graph once the manager's input exists.
struct Wiring<M, E, U, H, F, S> {
    handle: Handle,
    scope: CancellationToken,
    runner_factory: Arc<dyn RunnerFactory>,
    update: U,
    effect_handler: H,
    event_source: S,
    initial: M,
    observable: Arc<OnceLock<Arc<ObservableConnection<M>>>>,
    most_recent: Arc<ArcSwapOption<M>>,
    _effect: PhantomData<fn(E) -> F>,
}

impl<M, E, U, H, F, S> Wiring<M, E, U, H, F, S>
where
    M: Clone + Send + Sync + 'static,
    E: Send + 'static,
    U: Fn(&M, E) -> Next<M, F> + Send + Sync + 'static,
    H: Fn(F) -> BoxStream<'static, E> + Send + Sync + 'static,
    F: Clone + Eq + Hash + Send + Sync + 'static,
    S: Connectable<M, E> + 'static,
{
    /// Build the graph back to front, against the manager's forwarding `input`.
    fn build(self, input: SharedConsumer<E>) -> Result<SharedConnection<E>, StageError> {
        let mut parts = LoopParts::default();

        // Effects and the event source both feed back into the manager.
        let merge = Join::new().connect_join(input)?;
        let source_input = merge.branch()?;
        parts.push(Arc::clone(&merge) as Arc<dyn Disposable>);

        let effects = FlatMapFlow::new(self.handle, self.scope, self.effect_handler)
            .connect(Arc::clone(&merge) as SharedConsumer<E>)?;
        parts.push_connection(&effects);

        let source = self.event_source.connect(as_consumer(&source_input))?;
        parts.push_connection(&source);

        let observable = ObservableItems::new().connect_observable(as_consumer(&source));
        parts.push(Arc::clone(&observable) as Arc<dyn Disposable>);
        // The factory runs once per manager, so the cell is always empty here.
        let _ = self.observable.set(Arc::clone(&observable));

        let most_recent = self.most_recent;
        let models = Map::new(|next: Next<M, F>| next.model).connect(consumer_fn(
            move |model: M| {
                most_recent.store(Some(Arc::new(model.clone())));
                observable.consume(model)
            },
        ))?;

        let effect_input = Arc::clone(&effects);
        let split = Split::new().connect_split(consumer_fn(move |next: Next<M, F>| {
            for effect in next.effects {
                effect_input.consume(effect)?;
            }
            Ok(())
        }));
        split.connect(as_consumer(&models))?;
        parts.push(Arc::clone(&split) as Arc<dyn Disposable>);

        let update = self.update;
        let state = StateHolder::new(
            move |current: &Next<M, F>, event: E| update(&current.model, event),
            Next::model(self.initial),
        )
        .connect(split)?;
        parts.push_connection(&state);

        let head = SwitchToContext::new(self.runner_factory).connect(as_consumer(&state))?;

        Ok(Arc::new(LoopGraph { head, parts }))
    }
}

/// Disposables of a built graph, in the order they are released.
#[derive(Default)]
struct LoopParts(Vec<Arc<dyn Disposable>>);

impl LoopParts {
    fn push(&mut self, part: Arc<dyn Disposable>) {
        self.0.push(part);
    }

    fn push_connection<T: 'static>(&mut self, connection: &SharedConnection<T>) {
        self.0.push(Arc::new(Arc::clone(connection)));
    }
}

/// The manager's delegate: the worker stage in front, every other stage behind it.
struct LoopGraph<E> {
    head: SharedConnection<E>,
    parts: LoopParts,
}

impl<E> Consumer<E> for LoopGraph<E>
where
    E: Send + 'static,
{
    fn consume(&self, event: E) -> Result<(), StageError> {
        self.head.consume(event)
    }
}

impl<E> Disposable for LoopGraph<E>
where
    E: Send + 'static,
{
    fn dispose(&self) {
        self.head.dispose();
        for part in self.parts.0.iter().rev() {
            part.dispose();
        }
    }
}
