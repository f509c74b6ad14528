//! Stateless one-to-one transform stages.

use crate::connect::{
    consumer_fn, Connectable, IgnoreDispose, SharedConnection, SharedConsumer,
};
use crate::error::StageError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Applies a function to every item before passing it downstream.
///
/// Connections are stateless: `consume` calls the mapper and the output synchronously,
/// and `dispose` has nothing to release.
///
/// # Example
///
/// ```
/// use loopwire_core::connect::{consumer_fn, Connectable, Consumer};
/// use loopwire_core::map::Map;
///
/// let length = Map::new(|s: String| s.len());
/// let connection = length
///     .connect(consumer_fn(|n: usize| {
///         assert_eq!(n, 5);
///         Ok(())
///     }))
///     .unwrap();
/// connection.consume("hello".to_string()).unwrap();
/// ```
pub struct Map<In, Out, F> {
    mapper: Arc<F>,
    _types: PhantomData<fn(In) -> Out>,
}

/// Item-wise mapping. Same stage as [`Map`], named for mapping each item of a sequence.
pub type MapItems<In, Out, F> = Map<In, Out, F>;

impl<In, Out, F> Map<In, Out, F>
where
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    /// Create a mapping stage.
    #[must_use]
    pub fn new(mapper: F) -> Self {
        Self {
            mapper: Arc::new(mapper),
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> Connectable<In, Out> for Map<In, Out, F>
where
    In: 'static,
    Out: 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    fn connect(&self, output: SharedConsumer<Out>) -> Result<SharedConnection<In>, StageError> {
        let mapper = Arc::clone(&self.mapper);
        let forward = consumer_fn(move |item: In| output.consume(mapper(item)));
        Ok(Arc::new(IgnoreDispose::new(forward)))
    }
}

impl<In, Out, F> fmt::Debug for Map<In, Out, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Map")
    }
}
