//! Application state shared across handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::AuthState;
use crate::config::Settings;
use crate::events::EventBus;
use crate::session::SessionRegistry;
use crate::ws::Hub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event bus; one per server.
    pub bus: EventBus,
    /// Subscription hub fed by the bus.
    pub hub: Hub,
    pub sessions: SessionRegistry,
    pub auth: AuthState,
    pub settings: Arc<Settings>,
    /// Cancelled when the server shuts down; open sockets watch it.
    pub shutdown: CancellationToken,
    /// Tracks WebSocket connection tasks so shutdown can wait for them.
    pub tasks: TaskTracker,
}

impl AppState {
    /// Create a fresh bus, hub and session registry.
    pub fn new(settings: Settings, auth: AuthState) -> Self {
        let bus = EventBus::new();
        let hub = Hub::new(&bus);
        let sessions = SessionRegistry::new(bus.clone(), settings.profile_dir.clone());

        Self {
            bus,
            hub,
            sessions,
            auth,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }
}
