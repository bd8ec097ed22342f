//! Lifecycle event streaming
//!
//! Every significant action in a driver emits an event to the bus. The UI
//! and any loggers subscribe; publishers never block on slow subscribers.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::{Event, EventKind, EventLogEntry};
