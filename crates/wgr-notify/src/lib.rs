//! Notification fan-out: per-user realtime event delivery to any number of
//! connected clients.
//!
//! The registry keeps one unbounded sender per live connection. Delivery is
//! best-effort: a send to a closed channel prunes that connection on the
//! spot (lazy prune — there is no reaper task), and a user with no
//! connections costs one map lookup.

pub mod envelope;
pub mod registry;

pub use envelope::EventEnvelope;
pub use registry::{ConnectionHandle, Notifier};
