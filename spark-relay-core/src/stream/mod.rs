//! Downstream stream plumbing
//!
//! Relay events are pushed into sinks; the registry maps stream ids to the
//! sinks that are still live.

pub mod events;
pub mod registry;
pub mod sink;

pub use events::{ContentPayload, RelayEvent};
pub use registry::RelayRegistry;
pub use sink::{ChannelSink, EventSink, SinkHandle, SinkReceiver};
