//! Event contracts shared by the domain crates and the infrastructure.
//!
//! - [`Event`]: what every domain event exposes (type name, schema version, time)
//! - [`EventEnvelope`]: tenant + stream metadata wrapped around a payload
//! - [`EventBus`]: fan-out to projections after events are persisted

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
