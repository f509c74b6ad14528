//! Metric names and descriptions.
//!
//! The runtime records counters through the [`metrics`] facade. No recorder or exporter is
//! installed here: applications that want the numbers install one (Prometheus, statsd, an
//! in-memory recorder in tests) and call [`describe`] once to register the help texts.
//!
//! | Counter | Incremented when |
//! |---------|------------------|
//! | `loopwire.events.dispatched` | an event is handed to a loop |
//! | `loopwire.events.queued` | the lifecycle manager buffers an event during start-up |
//! | `loopwire.events.dropped` | the lifecycle manager drops an event while stopping |
//! | `loopwire.effects.spawned` | a flat-map stage spawns an expansion task |
//! | `loopwire.lifecycle.disposed` | a lifecycle manager finishes disposing |

use metrics::describe_counter;
use std::sync::Once;

/// Events dispatched into a loop.
pub const EVENTS_DISPATCHED: &str = "loopwire.events.dispatched";

/// Events buffered while the pipeline was being built.
pub const EVENTS_QUEUED: &str = "loopwire.events.queued";

/// Events dropped because disposal was in progress.
pub const EVENTS_DROPPED: &str = "loopwire.events.dropped";

/// Expansion tasks spawned by flat-map stages.
pub const EFFECTS_SPAWNED: &str = "loopwire.effects.spawned";

/// Lifecycle managers that completed disposal.
pub const LIFECYCLE_DISPOSED: &str = "loopwire.lifecycle.disposed";

static DESCRIBE: Once = Once::new();

/// Register descriptions for every runtime counter with the installed recorder.
///
/// Safe to call repeatedly; descriptions are registered once per process.
pub fn describe() {
    DESCRIBE.call_once(|| {
        describe_counter!(EVENTS_DISPATCHED, "Total number of events dispatched into loops");
        describe_counter!(
            EVENTS_QUEUED,
            "Total number of events buffered while a loop was starting"
        );
        describe_counter!(
            EVENTS_DROPPED,
            "Total number of events dropped while a loop was being disposed"
        );
        describe_counter!(EFFECTS_SPAWNED, "Total number of expansion tasks spawned");
        describe_counter!(
            LIFECYCLE_DISPOSED,
            "Total number of lifecycle managers that finished disposing"
        );
    });
}
