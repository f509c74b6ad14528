//! Loop configuration.

use crate::runner::RunnerFactory;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Configuration for [`EventLoop`](crate::event_loop::EventLoop) instances.
///
/// Every field is optional; anything left unset falls back to a default when the loop is
/// built.
///
/// # Example
///
/// ```
/// use loopwire_runtime::config::LoopConfig;
/// use loopwire_runtime::runner::NamedThreadRunnerFactory;
/// use std::sync::Arc;
///
/// let config = LoopConfig::default()
///     .with_runner_factory(Arc::new(NamedThreadRunnerFactory::with_prefix("ui")));
/// assert!(config.runner_factory.is_some());
/// ```
#[derive(Clone, Default)]
pub struct LoopConfig {
    /// Factory for the worker that runs the update function.
    ///
    /// Defaults to named OS threads, `"Event Runner (<loop name>:<index>)"`.
    pub runner_factory: Option<Arc<dyn RunnerFactory>>,
    /// Runtime that effect handlers are spawned on.
    ///
    /// Defaults to the runtime the loop is constructed in.
    pub handle: Option<Handle>,
    /// Scope the loop's cancellation scope is derived from.
    ///
    /// Cancelling it stops every effect the loop is running. Defaults to a fresh root scope.
    pub parent_scope: Option<CancellationToken>,
}

impl LoopConfig {
    /// Set the worker factory
    #[must_use]
    pub fn with_runner_factory(mut self, factory: Arc<dyn RunnerFactory>) -> Self {
        self.runner_factory = Some(factory);
        self
    }

    /// Set the runtime handle used for effects
    #[must_use]
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Derive the loop's scope from `parent`
    #[must_use]
    pub fn with_parent_scope(mut self, parent: CancellationToken) -> Self {
        self.parent_scope = Some(parent);
        self
    }
}

impl fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConfig")
            .field("runner_factory", &self.runner_factory.is_some())
            .field("handle", &self.handle.is_some())
            .field("parent_scope", &self.parent_scope)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use crate::runner::NamedThreadRunnerFactory;

    #[test]
    fn test_default_config_leaves_everything_unset() {
        let config = LoopConfig::default();

        assert!(config.runner_factory.is_none());
        assert!(config.handle.is_none());
        assert!(config.parent_scope.is_none());
    }

    #[tokio::test]
    async fn test_builder_sets_fields() {
        let parent = CancellationToken::new();
        let config = LoopConfig::default()
            .with_runner_factory(Arc::new(NamedThreadRunnerFactory::with_prefix("cfg")))
            .with_handle(Handle::current())
            .with_parent_scope(parent.clone());

        assert!(config.runner_factory.is_some());
        assert!(config.handle.is_some());
        parent.cancel();
        assert!(config.parent_scope.is_some_and(|scope| scope.is_cancelled()));
    }
}
