//! The result of one update step: a new model plus the effects it requested.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// Output of an update function.
///
/// Effects are a set: structurally equal effects emitted by the same step collapse into one,
/// and their order carries no meaning.
///
/// # Example
///
/// ```
/// use loopwire_core::next::Next;
///
/// let next = Next::new(3, ["log", "log", "save"]);
/// assert_eq!(next.model, 3);
/// assert_eq!(next.effects.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Next<M, F>
where
    F: Eq + Hash,
{
    /// The model after the update
    pub model: M,
    /// Effects requested by the update
    pub effects: HashSet<F>,
}

impl<M, F> Next<M, F>
where
    F: Eq + Hash,
{
    /// Create a `Next` from a model and any collection of effects.
    #[must_use]
    pub fn new(model: M, effects: impl IntoIterator<Item = F>) -> Self {
        Self {
            model,
            effects: effects.into_iter().collect(),
        }
    }

    /// Create a `Next` that carries a model and no effects.
    #[must_use]
    pub fn model(model: M) -> Self {
        Self {
            model,
            effects: HashSet::new(),
        }
    }

    /// Whether the update requested any effects.
    #[must_use]
    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    /// Split into the model and the effect set.
    #[must_use]
    pub fn into_parts(self) -> (M, HashSet<F>) {
        (self.model, self.effects)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Effect {
        A,
        B,
    }

    #[test]
    fn test_duplicate_effects_collapse() {
        let next = Next::new("model", [Effect::A, Effect::A, Effect::B]);

        assert_eq!(next.effects.len(), 2);
        assert!(next.effects.contains(&Effect::A));
        assert!(next.effects.contains(&Effect::B));
    }

    #[test]
    fn test_model_only_has_no_effects() {
        let next: Next<u8, Effect> = Next::model(7);

        assert!(!next.has_effects());
        let (model, effects) = next.into_parts();
        assert_eq!(model, 7);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_snapshot_survives_binary_encoding() {
        let next = Next::new("saved".to_string(), [Effect::A, Effect::B, Effect::A]);

        let bytes = bincode::serialize(&next).unwrap();
        let restored: Next<String, Effect> = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored, next);
        assert_eq!(restored.effects.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_effect_set_matches_distinct_inputs(effects in proptest::collection::vec(0u8..8, 0..32)) {
            let next = Next::new((), effects.clone());
            let distinct: HashSet<u8> = effects.into_iter().collect();
            prop_assert_eq!(next.effects, distinct);
        }
    }
}
