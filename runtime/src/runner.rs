//! Single-worker execution contexts.
//!
//! A [`Runner`] executes submitted jobs one at a time, in submission order, on one dedicated
//! worker. [`RunnerFactory`] creates a fresh runner for every connection of a
//! [`SwitchToContext`](crate::switch_context::SwitchToContext) stage.
//!
//! Closing a runner stops it from accepting work. Jobs that were already submitted still run
//! before the worker exits.

use arc_swap::ArcSwapOption;
use loopwire_core::StageError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unit of work executed by a runner.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial executor with clean shutdown.
pub trait Runner: Send + Sync {
    /// Queue a job. Jobs run one at a time, in the order they were submitted.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Disposed`] after [`Runner::close`] was called.
    fn submit(&self, job: Job) -> Result<(), StageError>;

    /// Stop accepting jobs. Already-submitted jobs are still executed.
    fn close(&self);

    /// Name of the worker, for logs.
    fn name(&self) -> &str;
}

/// Creates runners on demand.
pub trait RunnerFactory: Send + Sync {
    /// Create the runner for the `index`-th connection of a stage.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Runner`] if the worker could not be created.
    fn create(&self, index: usize) -> Result<Arc<dyn Runner>, StageError>;
}

/// Runner backed by one named OS thread.
///
/// The thread drains an unbounded channel and exits once the runner is closed and every
/// queued job has run.
pub struct ThreadRunner {
    name: String,
    sender: ArcSwapOption<mpsc::UnboundedSender<Job>>,
}

impl ThreadRunner {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Runner`] if the OS refuses to spawn the thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, StageError> {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();

        let worker_name = name.clone();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_jobs(&worker_name, receiver))
            .map_err(|error| StageError::Runner(format!("failed to spawn {name}: {error}")))?;

        tracing::debug!(runner = %name, "Runner started");

        Ok(Self {
            name,
            sender: ArcSwapOption::from_pointee(sender),
        })
    }

    /// Whether the runner still accepts jobs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.load().is_some()
    }
}

fn run_jobs(name: &str, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.blocking_recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(runner = %name, "Job panicked; runner keeps going");
        }
    }
    tracing::debug!(runner = %name, "Runner drained and stopped");
}

impl Runner for ThreadRunner {
    fn submit(&self, job: Job) -> Result<(), StageError> {
        let guard = self.sender.load();
        let Some(sender) = &*guard else {
            return Err(StageError::disposed("Runner"));
        };
        sender
            .send(job)
            .map_err(|_| StageError::disposed("Runner"))
    }

    fn close(&self) {
        if self.sender.swap(None).is_some() {
            tracing::debug!(runner = %self.name, "Runner closed");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ThreadRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRunner")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Factory producing [`ThreadRunner`]s whose thread names are derived from the connection
/// index.
///
/// # Example
///
/// ```
/// use loopwire_runtime::runner::{NamedThreadRunnerFactory, RunnerFactory};
///
/// let factory = NamedThreadRunnerFactory::new(|index| format!("worker-{index}"));
/// let runner = factory.create(0).unwrap();
/// assert_eq!(runner.name(), "worker-0");
/// runner.close();
/// ```
#[derive(Clone)]
pub struct NamedThreadRunnerFactory {
    naming: Arc<dyn Fn(usize) -> String + Send + Sync>,
}

impl NamedThreadRunnerFactory {
    /// Create a factory that names each worker with `naming(index)`.
    #[must_use]
    pub fn new<F>(naming: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        Self {
            naming: Arc::new(naming),
        }
    }

    /// Name workers `"<prefix>:<index>"`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |index| format!("{prefix}:{index}"))
    }
}

impl RunnerFactory for NamedThreadRunnerFactory {
    fn create(&self, index: usize) -> Result<Arc<dyn Runner>, StageError> {
        Ok(Arc::new(ThreadRunner::spawn((self.naming)(index))?))
    }
}

impl fmt::Debug for NamedThreadRunnerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NamedThreadRunnerFactory")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_submission_order_on_named_thread() {
        let runner = ThreadRunner::spawn("ordered-runner").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = std_mpsc::channel();

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            runner
                .submit(Box::new(move || {
                    let thread = std::thread::current().name().map(str::to_owned);
                    seen.lock().unwrap().push((i, thread));
                }))
                .unwrap();
        }
        runner
            .submit(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
        assert!(seen
            .iter()
            .all(|(_, thread)| thread.as_deref() == Some("ordered-runner")));
        runner.close();
    }

    #[test]
    fn test_close_drains_submitted_jobs_and_refuses_new_ones() {
        let runner = ThreadRunner::spawn("draining-runner").unwrap();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let (done_tx, done_rx) = std_mpsc::channel();

        runner
            .submit(Box::new(move || {
                gate_rx.recv().unwrap();
            }))
            .unwrap();
        runner
            .submit(Box::new(move || done_tx.send("drained").unwrap()))
            .unwrap();

        runner.close();
        assert!(!runner.is_open());
        assert_eq!(
            runner.submit(Box::new(|| {})),
            Err(StageError::disposed("Runner"))
        );

        gate_tx.send(()).unwrap();
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "drained"
        );
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_panicking_job_does_not_stop_runner() {
        let runner = ThreadRunner::spawn("panicking-runner").unwrap();
        let (done_tx, done_rx) = std_mpsc::channel();

        runner.submit(Box::new(|| panic!("job failure"))).unwrap();
        runner
            .submit(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();

        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        runner.close();
    }

    #[test]
    fn test_factory_names_runners_by_index() {
        let factory = NamedThreadRunnerFactory::with_prefix("test-runner");
        let first = factory.create(0).unwrap();
        let second = factory.create(1).unwrap();

        assert_eq!(first.name(), "test-runner:0");
        assert_eq!(second.name(), "test-runner:1");
        first.close();
        second.close();
    }
}
