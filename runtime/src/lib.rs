//! # Loopwire Runtime
//!
//! Asynchronous stages, admission control and the assembled event loop.
//!
//! This crate builds on the capability traits and synchronous stages of `loopwire-core`
//! (re-exported as [`loopwire_core`]) and adds everything that involves threads, tasks or lifecycle:
//!
//! ## Core Components
//!
//! - **`FlatMapFlow`**: expands each item into an async stream, one tokio task per item
//! - **`SwitchToContext`**: serializes consumption onto a dedicated worker per connection
//! - **`LifecycleManager`**: buffers events while a pipeline is built, drops them while it
//!   is torn down
//! - **`EventLoop`**: update function, effect handler and event source wired into one graph
//!
//! ## Example
//!
//! ```
//! use futures::StreamExt;
//! use loopwire_runtime::loopwire_core::{consumer_fn, Next};
//! use loopwire_runtime::{EventLoop, NoEventSource};
//!
//! #[derive(Clone, PartialEq, Eq, Hash)]
//! enum Effect {
//!     Log(String),
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let greeter = EventLoop::new(
//!     "greeter",
//!     |greeting: &String, name: String| {
//!         let next = format!("{greeting} {name}");
//!         Next::new(next.clone(), [Effect::Log(next)])
//!     },
//!     |effect: Effect| {
//!         let Effect::Log(line) = effect;
//!         println!("{line}");
//!         futures::stream::empty().boxed()
//!     },
//!     NoEventSource,
//!     "hello".to_string(),
//! )
//! .unwrap();
//!
//! let _subscription = greeter
//!     .observe(consumer_fn(|greeting: String| {
//!         println!("model: {greeting}");
//!         Ok(())
//!     }))
//!     .unwrap();
//! greeter.dispatch_event("world".to_string()).unwrap();
//! greeter.dispose();
//! # }
//! ```

pub use loopwire_core;

/// Loop configuration
pub mod config;

/// The assembled update/effect loop
pub mod event_loop;

/// Asynchronous one-to-many expansion
pub mod flat_map;

/// Admission-control state machine
pub mod lifecycle;

/// Metric names
pub mod metrics;

/// Single-worker execution contexts
pub mod runner;

/// Hand-off onto a dedicated worker
pub mod switch_context;

pub use config::LoopConfig;
pub use event_loop::{EventLoop, NoEventSource};
pub use flat_map::FlatMapFlow;
pub use lifecycle::{LifecycleManager, LifecyclePhase, LoopFactory};
pub use runner::{NamedThreadRunnerFactory, Runner, RunnerFactory, ThreadRunner};
pub use switch_context::SwitchToContext;
