//! Error types shared by every stage.
//!
//! Stages fail fast: every variant except [`StageError::Runner`] signals misuse of a
//! connection by its owner and is returned synchronously at the call site. Nothing here is
//! retried. Cancellation of asynchronous work is not an error and never surfaces as one.

use thiserror::Error;

/// Errors that can occur while connecting, feeding or starting a stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// An item arrived before the lifecycle manager was started.
    #[error("Lifecycle manager not started when an item arrived")]
    NotStarted,

    /// `start()` was called on a lifecycle manager that already left its initial state.
    #[error("Lifecycle manager has already been started")]
    AlreadyStarted,

    /// The stage has been disposed and no longer accepts items, observers or outputs.
    #[error("{stage} has been disposed")]
    Disposed {
        /// Name of the stage that refused the call
        stage: &'static str,
    },

    /// A fan-out connection has started broadcasting and its outputs are locked in.
    #[error("Split connections are locked once the first item has been consumed")]
    ConnectionsLocked,

    /// Two `consume()` calls overlapped on a stage that requires serialized callers.
    #[error("{stage} received overlapping consume() calls; route it through a single worker")]
    ConcurrentConsume {
        /// Name of the stage that detected the overlap
        stage: &'static str,
    },

    /// A bounded fan-in stage refused one more input.
    #[error("Too many connections (limit {limit})")]
    TooManyConnections {
        /// Maximum number of inputs the stage accepts
        limit: usize,
    },

    /// An execution context could not be created or refused work.
    #[error("Runner failure: {0}")]
    Runner(String),
}

impl StageError {
    /// Create a [`StageError::Disposed`] for the named stage.
    #[must_use]
    pub const fn disposed(stage: &'static str) -> Self {
        Self::Disposed { stage }
    }

    /// Whether this error reports illegal use of a connection (programmer error).
    ///
    /// The reserved arity error and runner failures are not illegal-state errors.
    #[must_use]
    pub const fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Self::NotStarted
                | Self::AlreadyStarted
                | Self::Disposed { .. }
                | Self::ConnectionsLocked
                | Self::ConcurrentConsume { .. }
        )
    }
}
