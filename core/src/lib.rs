//! # Loopwire Core
//!
//! Capability traits and synchronous stages for the Loopwire pipeline runtime.
//!
//! A pipeline is a graph of small stages. Each stage is a [`Connectable`]: give it the
//! downstream [`Consumer`] and it hands back the upstream [`Connection`] that feeds it.
//! Chaining stages means passing one stage's connection as the next stage's output.
//!
//! ## Core Concepts
//!
//! - **Consumer**: accepts one value at a time
//! - **Connection**: a consumer that can be disposed once
//! - **Connectable**: builds a connection around a downstream consumer
//! - **Next**: output of an update function, a model plus a set of effects
//!
//! ## Stages
//!
//! - [`Map`] / [`MapItems`]: stateless one-to-one transform
//! - [`Split`]: fan-out with a build phase and a locked-in broadcast phase
//! - [`Join`]: fan-in of several inputs into one output
//! - [`ObservableItems`]: broadcast with runtime subscribe/unsubscribe
//! - [`StateHolder`]: sequential reducer holding the accumulated model
//!
//! Asynchronous stages, the lifecycle manager and the assembled loop live in
//! `loopwire-runtime`.
//!
//! ## Example
//!
//! ```
//! use loopwire_core::prelude::*;
//!
//! let doubled = Map::new(|n: u32| n * 2);
//! let total = StateHolder::new(|sum: &u32, n: u32| sum + n, 0);
//!
//! let sink = consumer_fn(|sum: u32| {
//!     println!("running total: {sum}");
//!     Ok(())
//! });
//! let totals = total.connect(sink).unwrap();
//! let pipeline = doubled.connect(as_consumer(&totals)).unwrap();
//!
//! pipeline.consume(1).unwrap();
//! pipeline.consume(2).unwrap();
//! ```

/// Capability traits: consumer, disposable, connection, connectable
pub mod connect;

/// Error taxonomy shared by every stage
pub mod error;

/// Update-step output: model plus effect set
pub mod next;

/// Stateless transform stages
pub mod map;

/// Fan-out stage
pub mod split;

/// Fan-in stage
pub mod join;

/// Broadcast stage with dynamic subscribers
pub mod observable;

/// Sequential reducer stage
pub mod state_holder;

pub use connect::{
    as_consumer, consumer_fn, Connectable, Connection, Consumer, Disposable, IgnoreDispose,
    SharedConnection, SharedConsumer,
};
pub use error::StageError;
pub use join::{Join, JoinConnection};
pub use map::{Map, MapItems};
pub use next::Next;
pub use observable::{ObservableConnection, ObservableItems, Subscription};
pub use split::{Split, SplitConnection};
pub use state_holder::StateHolder;

/// Everything needed to wire a pipeline by hand.
pub mod prelude {
    pub use crate::connect::{
        as_consumer, consumer_fn, Connectable, Connection, Consumer, Disposable,
        SharedConnection, SharedConsumer,
    };
    pub use crate::error::StageError;
    pub use crate::join::Join;
    pub use crate::map::{Map, MapItems};
    pub use crate::next::Next;
    pub use crate::observable::ObservableItems;
    pub use crate::split::Split;
    pub use crate::state_holder::StateHolder;
}
