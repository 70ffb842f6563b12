//! Real-time event delivery to dashboard clients.
//!
//! ```text
//! producers ──emit──▶ EventBus ──(one subscription)──▶ Hub
//!                                                      │ match subscriptions
//!                                                      ▼
//!                                   ConnectionWriter (bounded queue, try_send)
//!                                                      │
//!                                        writer task ──▶ WebSocket ──▶ Dashboard
//! ```
//!
//! The [`Hub`] owns the client registry and subscriptions. The gateway
//! ([`events_ws`]) upgrades the HTTP request, registers the connection with the
//! hub, forwards client frames to it and emits heartbeats.

mod handler;
mod hub;
mod writer;

pub use handler::{GatewaySettings, events_ws, handle_events_socket};
pub use hub::{ClientId, ClientSink, Hub, HubError, SinkError};
pub use writer::ConnectionWriter;
