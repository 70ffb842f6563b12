//! In-process event bus.
//!
//! Producers (the session registry, the upload channel) emit [`Event`]s; the
//! subscription hub holds one bus subscription and routes each event to the
//! connected dashboard clients.

mod bus;

pub use bus::{BusSubscription, Event, EventBus};
