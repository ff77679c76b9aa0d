//! Domain events and their distribution.
//!
//! Engine operations emit typed events; once the write that produced them has
//! committed they are wrapped in an [`EventEnvelope`] and published on an
//! [`EventBus`] for read-only consumers (document rendering, exports).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
