//! # Loopwire Testing
//!
//! Testing utilities and helpers for the Loopwire pipeline runtime.
//!
//! This crate provides:
//! - A recording consumer that captures everything it is fed
//! - Polling helpers for asserting on asynchronous delivery
//! - A Given-When-Then builder for update functions
//! - Test log output through `tracing-subscriber`
//!
//! ## Example
//!
//! ```
//! use loopwire_core::connect::{Connectable, Consumer};
//! use loopwire_core::map::Map;
//! use loopwire_testing::RecordingConsumer;
//!
//! let recorder = RecordingConsumer::new();
//! let connection = Map::new(|n: u32| n + 1).connect(recorder.consumer()).unwrap();
//!
//! connection.consume(1).unwrap();
//!
//! assert_eq!(recorder.items(), vec![2]);
//! ```

use loopwire_core::{Consumer, SharedConsumer, StageError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};


pub use update_test::{assertions, UpdateTest};

/// How often the polling helpers re-check their condition
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Consumer that records every item it receives.
///
/// Cloning yields another handle to the same recording.
///
/// # Example
///
/// ```
/// use loopwire_core::connect::Consumer;
/// use loopwire_testing::RecordingConsumer;
///
/// let recorder = RecordingConsumer::new();
/// recorder.consume("a").unwrap();
/// recorder.consume("b").unwrap();
/// assert_eq!(recorder.items(), vec!["a", "b"]);
/// ```
#[derive(Debug)]
pub struct RecordingConsumer<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> RecordingConsumer<T>
where
    T: Clone + Send + 'static,
{
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A shared consumer that records into this recorder
    #[must_use]
    pub fn consumer(&self) -> SharedConsumer<T> {
        Arc::new(self.clone())
    }

    /// Snapshot of everything recorded so far, in arrival order
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.lock().clone()
    }

    /// Number of recorded items
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for RecordingConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for RecordingConsumer<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Consumer<T> for RecordingConsumer<T>
where
    T: Clone + Send + 'static,
{
    fn consume(&self, item: T) -> Result<(), StageError> {
        self.lock().push(item);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses, without blocking the runtime.
///
/// Returns whether the condition was met.
pub async fn eventually<C>(timeout: Duration, mut condition: C) -> bool
where
    C: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Blocking variant of [`eventually`] for tests that run outside a runtime.
pub fn wait_until<C>(timeout: Duration, mut condition: C) -> bool
where
    C: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Send `tracing` output to the test harness.
///
/// Honors `RUST_LOG`, defaulting to debug output for the loopwire crates. Calling it more than once is fine.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "loopwire_core=debug,loopwire_runtime=debug".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
