//! Asynchronous one-to-many expansion.
//!
//! Each consumed item is turned into a stream by the mapper, and the stream is collected on
//! its own tokio task. Every element is forwarded downstream as soon as it is produced.
//! Expansions run concurrently, so elements from different items may interleave; elements of
//! one item keep their order.
//!
//! Every connection owns a child of the stage's parent [`CancellationToken`]. Disposing the
//! connection cancels that scope, which stops every running expansion at its next await
//! point. Cancelling the parent does the same for all connections at once.

use crate::metrics::EFFECTS_SPAWNED;
use futures::StreamExt;
use futures::stream::BoxStream;
use loopwire_core::{
    Connectable, Consumer, Disposable, SharedConnection, SharedConsumer, StageError,
};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

const STAGE: &str = "FlatMapFlow";

/// Connectable that expands each item into an asynchronous stream.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use loopwire_core::connect::{consumer_fn, Connectable, Consumer};
/// use loopwire_runtime::flat_map::FlatMapFlow;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let repeat = FlatMapFlow::new(
///     tokio::runtime::Handle::current(),
///     CancellationToken::new(),
///     |n: usize| futures::stream::iter(vec![n; n]).boxed(),
/// );
/// let connection = repeat
///     .connect(consumer_fn(|n: usize| {
///         println!("{n}");
///         Ok(())
///     }))
///     .unwrap();
/// connection.consume(3).unwrap();
/// # }
/// ```
pub struct FlatMapFlow<In, Out, F> {
    handle: Handle,
    parent: CancellationToken,
    mapper: Arc<F>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> FlatMapFlow<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> BoxStream<'static, Out> + Send + Sync + 'static,
{
    /// Create the stage.
    ///
    /// Expansions are spawned on `handle`; every connection's scope is a child of `parent`.
    #[must_use]
    pub fn new(handle: Handle, parent: CancellationToken, mapper: F) -> Self {
        Self {
            handle,
            parent,
            mapper: Arc::new(mapper),
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> Connectable<In, Out> for FlatMapFlow<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> BoxStream<'static, Out> + Send + Sync + 'static,
{
    fn connect(&self, output: SharedConsumer<Out>) -> Result<SharedConnection<In>, StageError> {
        Ok(Arc::new(FlatMapConnection {
            handle: self.handle.clone(),
            scope: self.parent.child_token(),
            mapper: Arc::clone(&self.mapper),
            output,
            _types: PhantomData,
        }))
    }
}

impl<In, Out, F> fmt::Debug for FlatMapFlow<In, Out, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatMapFlow")
            .field("cancelled", &self.parent.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct FlatMapConnection<In, Out, F> {
    handle: Handle,
    scope: CancellationToken,
    mapper: Arc<F>,
    output: SharedConsumer<Out>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> Consumer<In> for FlatMapConnection<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> BoxStream<'static, Out> + Send + Sync + 'static,
{
    fn consume(&self, item: In) -> Result<(), StageError> {
        if self.scope.is_cancelled() {
            return Err(StageError::disposed(STAGE));
        }

        let token = self.scope.child_token();
        let mapper = Arc::clone(&self.mapper);
        let output = Arc::clone(&self.output);

        metrics::counter!(EFFECTS_SPAWNED).increment(1);
        self.handle.spawn(async move {
            let mut stream = mapper(item);
            loop {
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    next = stream.next() => next,
                };
                let Some(element) = next else {
                    return;
                };
                if let Err(error) = output.consume(element) {
                    tracing::warn!(error = %error, "Expansion output refused element; stopping");
                    return;
                }
            }
        });

        Ok(())
    }
}

impl<In, Out, F> Disposable for FlatMapConnection<In, Out, F>
where
    In: Send,
    Out: Send,
    F: Send + Sync,
{
    fn dispose(&self) {
        if !self.scope.is_cancelled() {
            tracing::trace!("Cancelling expansion scope");
        }
        self.scope.cancel();
    }
}
