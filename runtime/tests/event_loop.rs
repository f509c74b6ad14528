//! End-to-end tests for the assembled event loop
//!
//! Drives complete loops through dispatch, effects, event sources, observation and disposal.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::StreamExt;
use loopwire_runtime::loopwire_core::{
    consumer_fn, Connectable, Consumer, Disposable, IgnoreDispose, Next, SharedConnection,
    SharedConsumer, StageError,
};
use loopwire_runtime::{EventLoop, LifecyclePhase, LoopConfig, NamedThreadRunnerFactory, NoEventSource};
use loopwire_testing::{assertions, eventually, init_tracing, RecordingConsumer, UpdateTest};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CounterEffect {
    /// Ask for a delayed follow-up increment
    Later(u32),
    /// Emit several events at once
    Burst(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CounterEvent {
    Add(u32),
    Schedule(u32),
    Burst(u32),
}

fn update(count: &u32, event: CounterEvent) -> Next<u32, CounterEffect> {
    match event {
        CounterEvent::Add(n) => Next::model(count + n),
        CounterEvent::Schedule(n) => Next::new(*count, [CounterEffect::Later(n)]),
        CounterEvent::Burst(n) => Next::new(*count, [CounterEffect::Burst(n)]),
    }
}

fn handle_effect(effect: CounterEffect) -> futures::stream::BoxStream<'static, CounterEvent> {
    match effect {
        CounterEffect::Later(n) => async_stream::stream! {
            tokio::time::sleep(Duration::from_millis(10)).await;
            yield CounterEvent::Add(n);
        }
        .boxed(),
        CounterEffect::Burst(n) => futures::stream::iter((0..n).map(|_| CounterEvent::Add(1))).boxed(),
    }
}

fn counter_loop(name: &str) -> EventLoop<u32, CounterEvent> {
    EventLoop::new(name, update, handle_effect, NoEventSource, 0).unwrap()
}

/// Event source that records the models it is shown and exposes its event output.
#[derive(Clone, Default)]
struct ScriptedSource {
    models: RecordingConsumer<u32>,
    output: Arc<Mutex<Option<SharedConsumer<CounterEvent>>>>,
    disposed: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    fn emit(&self, event: CounterEvent) -> Result<(), StageError> {
        let output = self.output.lock().unwrap().clone().expect("source not connected");
        output.consume(event)
    }
}

struct ScriptedConnection {
    models: RecordingConsumer<u32>,
    disposed: Arc<Mutex<bool>>,
}

impl Consumer<u32> for ScriptedConnection {
    fn consume(&self, model: u32) -> Result<(), StageError> {
        self.models.consume(model)
    }
}

impl Disposable for ScriptedConnection {
    fn dispose(&self) {
        *self.disposed.lock().unwrap() = true;
    }
}

impl Connectable<u32, CounterEvent> for ScriptedSource {
    fn connect(&self, output: SharedConsumer<CounterEvent>) -> Result<SharedConnection<u32>, StageError> {
        *self.output.lock().unwrap() = Some(output);
        Ok(Arc::new(ScriptedConnection {
            models: self.models.clone(),
            disposed: Arc::clone(&self.disposed),
        }))
    }
}

// ============================================================================
// Update function
// ============================================================================

#[test]
fn test_update_adds_without_effects() {
    UpdateTest::new(update)
        .given_model(2)
        .when_events([CounterEvent::Add(3), CounterEvent::Add(4)])
        .then_model(|count| assert_eq!(*count, 9))
        .then_effects(|effects| assertions::assert_no_effects(effects))
        .run();
}

#[test]
fn test_update_schedules_effect_and_keeps_model() {
    UpdateTest::new(update)
        .given_model(7)
        .when_event(CounterEvent::Schedule(5))
        .then_model(|count| assert_eq!(*count, 7))
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assertions::assert_has_effect(effects, &CounterEffect::Later(5));
        })
        .run();
}

// ============================================================================
// Models and observers
// ============================================================================

#[tokio::test]
async fn test_observer_sees_concatenated_models() {
    init_tracing();
    let looped = EventLoop::new(
        "concat",
        |model: &String, event: String| Next::<String, ()>::model(format!("{model}{event}")),
        |(): ()| futures::stream::empty().boxed(),
        NoEventSource,
        String::new(),
    )
    .unwrap();
    let observer = RecordingConsumer::new();
    let _subscription = looped.observe(observer.consumer()).unwrap();

    looped.dispatch_event("a".to_string()).unwrap();
    looped.dispatch_event("b".to_string()).unwrap();

    assert!(eventually(TIMEOUT, || observer.len() == 2).await);
    assert_eq!(observer.items(), vec!["a".to_string(), "ab".to_string()]);
}

#[tokio::test]
async fn test_unsubscribed_observer_stops_receiving() {
    let looped = counter_loop("unsubscribe");
    let kept = RecordingConsumer::new();
    let dropped = RecordingConsumer::new();
    let _kept_subscription = looped.observe(kept.consumer()).unwrap();
    let dropped_subscription = looped.observe(dropped.consumer()).unwrap();

    looped.dispatch_event(CounterEvent::Add(1)).unwrap();
    assert!(eventually(TIMEOUT, || dropped.len() == 1).await);
    dropped_subscription.dispose();
    looped.dispatch_event(CounterEvent::Add(1)).unwrap();

    assert!(eventually(TIMEOUT, || kept.len() == 2).await);
    assert_eq!(kept.items(), vec![1, 2]);
    assert_eq!(dropped.items(), vec![1]);
}

#[tokio::test]
async fn test_most_recent_model_tracks_broadcasts() {
    let looped = counter_loop("recent");
    assert_eq!(looped.most_recent_model(), None);

    looped.dispatch_event(CounterEvent::Add(3)).unwrap();
    looped.dispatch_event(CounterEvent::Add(4)).unwrap();

    assert!(eventually(TIMEOUT, || looped.most_recent_model() == Some(7)).await);
    assert_eq!(looped.name(), "recent");
}

#[tokio::test]
async fn test_events_from_many_threads_are_all_applied() {
    let looped = Arc::new(counter_loop("threads"));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let looped = Arc::clone(&looped);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    looped.dispatch_event(CounterEvent::Add(1)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(eventually(TIMEOUT, || looped.most_recent_model() == Some(1000)).await);
}

// ============================================================================
// Effects
// ============================================================================

#[tokio::test]
async fn test_effect_events_come_back_into_the_loop() {
    let looped = counter_loop("effects");
    let observer = RecordingConsumer::new();
    let _subscription = looped.observe(observer.consumer()).unwrap();

    looped.dispatch_event(CounterEvent::Schedule(5)).unwrap();

    assert!(eventually(TIMEOUT, || observer.items().last() == Some(&5)).await);
    assert_eq!(observer.items(), vec![0, 5]);
}

#[tokio::test]
async fn test_effect_emitting_many_events() {
    let looped = counter_loop("burst");

    looped.dispatch_event(CounterEvent::Burst(10)).unwrap();

    assert!(eventually(TIMEOUT, || looped.most_recent_model() == Some(10)).await);
}

#[tokio::test]
async fn test_dispose_stops_pending_effects() {
    let looped = counter_loop("pending");
    let observer = RecordingConsumer::new();
    let _subscription = looped.observe(observer.consumer()).unwrap();

    looped.dispatch_event(CounterEvent::Schedule(5)).unwrap();
    assert!(eventually(TIMEOUT, || observer.len() == 1).await);
    looped.dispose();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(observer.items(), vec![0]);
}

// ============================================================================
// Event source
// ============================================================================

#[tokio::test]
async fn test_event_source_drives_loop_and_sees_models() {
    let source = ScriptedSource::default();
    let looped = EventLoop::new("source", update, handle_effect, source.clone(), 0).unwrap();

    source.emit(CounterEvent::Add(2)).unwrap();
    source.emit(CounterEvent::Add(3)).unwrap();

    assert!(eventually(TIMEOUT, || source.models.len() == 2).await);
    assert_eq!(source.models.items(), vec![2, 5]);
    assert_eq!(looped.most_recent_model(), Some(5));
}

#[tokio::test]
async fn test_dispose_reaches_event_source() {
    let source = ScriptedSource::default();
    let looped = EventLoop::new("source-dispose", update, handle_effect, source.clone(), 0).unwrap();

    looped.dispose();

    assert!(*source.disposed.lock().unwrap());
    assert!(source.emit(CounterEvent::Add(1)).is_err());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disposed_loop_refuses_events_and_observers() {
    let looped = counter_loop("disposed");

    looped.dispose();
    looped.dispose();

    assert_eq!(looped.phase(), LifecyclePhase::Stopped);
    assert_eq!(
        looped.dispatch_event(CounterEvent::Add(1)),
        Err(StageError::disposed("LifecycleManager"))
    );
    assert!(looped.observe(consumer_fn(|_: u32| Ok(()))).is_err());
}

#[tokio::test]
async fn test_custom_runner_factory_names_worker() {
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    let looped = EventLoop::with_config(
        "custom",
        update,
        handle_effect,
        NoEventSource,
        0,
        LoopConfig::default().with_runner_factory(Arc::new(NamedThreadRunnerFactory::with_prefix("ui"))),
    )
    .unwrap();
    let _subscription = looped
        .observe(consumer_fn(move |_: u32| {
            let name = std::thread::current().name().map(str::to_owned);
            sink.lock().unwrap().push(name);
            Ok(())
        }))
        .unwrap();

    looped.dispatch_event(CounterEvent::Add(1)).unwrap();

    assert!(eventually(TIMEOUT, || !names.lock().unwrap().is_empty()).await);
    assert_eq!(names.lock().unwrap()[0].as_deref(), Some("ui:0"));
}

#[tokio::test]
async fn test_failing_source_connect_fails_construction() {
    struct BrokenSource;
    impl Connectable<u32, CounterEvent> for BrokenSource {
        fn connect(&self, _: SharedConsumer<CounterEvent>) -> Result<SharedConnection<u32>, StageError> {
            Err(StageError::TooManyConnections { limit: 0 })
        }
    }

    let result = EventLoop::new("broken", update, handle_effect, BrokenSource, 0);

    assert!(matches!(result, Err(StageError::TooManyConnections { limit: 0 })));
}

#[tokio::test]
async fn test_ignore_dispose_source_is_accepted() {
    struct SilentSource;
    impl Connectable<u32, CounterEvent> for SilentSource {
        fn connect(&self, _: SharedConsumer<CounterEvent>) -> Result<SharedConnection<u32>, StageError> {
            Ok(Arc::new(IgnoreDispose::new(consumer_fn(|_: u32| Ok(())))))
        }
    }

    let looped = EventLoop::new("silent", update, handle_effect, SilentSource, 0).unwrap();
    looped.dispatch_event(CounterEvent::Add(9)).unwrap();

    assert!(eventually(TIMEOUT, || looped.most_recent_model() == Some(9)).await);
}
