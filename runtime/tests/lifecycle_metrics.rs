//! Lifecycle counters recorded through the `metrics` facade
//!
//! Runs in its own test binary: the recorder is process-global, so no other test may create
//! or dispose managers alongside it.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use loopwire_runtime::loopwire_core::{
    consumer_fn, Consumer, Disposable, IgnoreDispose, SharedConnection, StageError,
};
use loopwire_runtime::metrics::{EVENTS_DROPPED, LIFECYCLE_DISPOSED};
use loopwire_runtime::{LifecycleManager, LifecyclePhase};
use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Recorder
// ============================================================================

#[derive(Default)]
struct Tally(AtomicU64);

impl CounterFn for Tally {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::SeqCst);
    }

    fn absolute(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// In-memory recorder keeping one tally per counter name. Clones share the tallies.
#[derive(Clone, Default)]
struct CountingRecorder {
    counters: Arc<Mutex<HashMap<String, Arc<Tally>>>>,
}

impl CountingRecorder {
    fn tally(&self, name: &str) -> Arc<Tally> {
        Arc::clone(self.counters.lock().unwrap().entry(name.to_string()).or_default())
    }

    fn value(&self, name: &str) -> u64 {
        self.tally(name).0.load(Ordering::SeqCst)
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.tally(key.name()))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

fn install_recorder() -> CountingRecorder {
    let recorder = CountingRecorder::default();
    assert!(
        metrics::set_global_recorder(recorder.clone()).is_ok(),
        "another recorder is already installed"
    );
    recorder
}

/// Delegate that counts its own disposals.
struct CountingDelegate(Arc<AtomicUsize>);

impl Consumer<u32> for CountingDelegate {
    fn consume(&self, _: u32) -> Result<(), StageError> {
        Ok(())
    }
}

impl Disposable for CountingDelegate {
    fn dispose(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_racing_disposes_complete_teardown_exactly_once() {
    const CALLERS: usize = 16;
    let recorder = install_recorder();

    // Many callers racing one dispose: one teardown.
    let disposals = Arc::new(AtomicUsize::new(0));
    let delegate = Arc::clone(&disposals);
    let scope = CancellationToken::new();
    let manager = LifecycleManager::new("metrics", scope.clone(), move |_input| {
        Ok(Arc::new(CountingDelegate(delegate)) as SharedConnection<u32>)
    });
    manager.start().unwrap();

    let barrier = Arc::new(Barrier::new(CALLERS));
    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.dispose();
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(recorder.value(LIFECYCLE_DISPOSED), 1);
    assert_eq!(disposals.load(Ordering::SeqCst), 1);
    assert!(scope.is_cancelled());

    // Later disposes of a stopped manager do not tear down again.
    manager.dispose();
    assert_eq!(recorder.value(LIFECYCLE_DISPOSED), 1);
    assert_eq!(manager.phase(), LifecyclePhase::Stopped);

    // Events buffered during start-up and discarded by dispose are counted as dropped.
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let pending = LifecycleManager::new("metrics-pending", CancellationToken::new(), move |_input| {
        entered_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        Ok(Arc::new(IgnoreDispose::new(consumer_fn(|_: u32| Ok(())))) as SharedConnection<u32>)
    });
    let starter = {
        let pending = Arc::clone(&pending);
        thread::spawn(move || pending.start())
    };
    entered_rx.recv().unwrap();
    pending.consume(1).unwrap();
    pending.consume(2).unwrap();

    pending.dispose();
    release_tx.send(()).unwrap();
    starter.join().unwrap().unwrap();

    assert_eq!(recorder.value(EVENTS_DROPPED), 2);
    assert_eq!(recorder.value(LIFECYCLE_DISPOSED), 2);
}
