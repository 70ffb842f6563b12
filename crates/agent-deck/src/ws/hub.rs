//! Subscription hub: routes bus events to dashboard clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use agent_deck_protocol::{Channel, ClientFrame, SESSION_CHANNEL, ServerMessage};
use log::{debug, trace};
use serde_json::Value;
use thiserror::Error;

use crate::events::{BusSubscription, Event, EventBus};

/// Identifier assigned to each registered client.
pub type ClientId = u64;

/// Write path of one client connection.
///
/// Implementations must not block: the hub calls `send` from whatever thread
/// emitted the event.
pub trait ClientSink: Send + Sync {
    fn send(&self, msg: &ServerMessage) -> Result<(), SinkError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("client outbound queue is full")]
    Full,
    #[error("client connection is closed")]
    Closed,
}

/// Errors from [`Hub::handle_message`]. All of them are reported to the client
/// as `{type:"error"}` and leave the connection open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("session subscription requires a sessionId")]
    MissingSessionId,
}

impl HubError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownClient(_) => "UNKNOWN_CLIENT",
            Self::UnknownType(_) => "UNKNOWN_TYPE",
            Self::UnknownChannel(_) => "UNKNOWN_CHANNEL",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::MissingSessionId => "MISSING_SESSION_ID",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Bucket(Channel),
    Session(String),
}

impl Target {
    fn matches(&self, bucket: Channel, event: &Event) -> bool {
        match self {
            Target::Bucket(channel) => *channel == bucket,
            Target::Session(session_id) => *session_id == event.channel,
        }
    }

    fn name(&self) -> &str {
        match self {
            Target::Bucket(channel) => channel.as_str(),
            Target::Session(_) => SESSION_CHANNEL,
        }
    }
}

struct ClientEntry {
    sink: Arc<dyn ClientSink>,
    subscriptions: HashMap<String, Target>,
    next_subscription: u64,
}

#[derive(Default)]
struct HubInner {
    next_client: AtomicU64,
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    bus_subscription: Mutex<Option<BusSubscription>>,
}

impl HubInner {
    /// Deliver one event to every client with a matching subscription.
    fn dispatch(&self, event: &Event) {
        let bucket = event.bucket();
        let recipients: Vec<(ClientId, Arc<dyn ClientSink>)> = {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            clients
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .subscriptions
                        .values()
                        .any(|target| target.matches(bucket, event))
                })
                .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
                .collect()
        };

        if recipients.is_empty() {
            return;
        }

        let message = ServerMessage::Event {
            channel: bucket,
            event_type: event.event_type.wire_name().to_string(),
            data: event.data.clone(),
        };

        for (client_id, sink) in recipients {
            if let Err(err) = sink.send(&message) {
                trace!(
                    "dropping {} for client {}: {}",
                    event.event_type, client_id, err
                );
            }
        }
    }
}

/// Maps bus events to interested clients.
///
/// The hub owns the client registry and every subscription. It holds a single
/// bus subscription for its whole lifetime; [`Hub::close`] releases it.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(bus: &EventBus) -> Self {
        let inner = Arc::new(HubInner::default());
        let weak: Weak<HubInner> = Arc::downgrade(&inner);
        let subscription = bus.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(event);
            }
        });
        *inner
            .bus_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        Self { inner }
    }

    /// Register a connection and return its id. Ids increase monotonically.
    pub fn register_client(&self, sink: Arc<dyn ClientSink>) -> ClientId {
        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients_mut().insert(
            id,
            ClientEntry {
                sink,
                subscriptions: HashMap::new(),
                next_subscription: 0,
            },
        );
        debug!("client {} registered", id);
        id
    }

    /// Drop a client and all of its subscriptions. Unknown ids are ignored.
    pub fn unregister_client(&self, client_id: ClientId) {
        if self.clients_mut().remove(&client_id).is_some() {
            debug!("client {} unregistered", client_id);
        }
    }

    /// Handle one text frame from a client.
    ///
    /// Replies (`subscribed`, `pong`) are written to the client's sink; errors
    /// are returned for the caller to report.
    pub fn handle_message(&self, client_id: ClientId, raw: &str) -> Result<(), HubError> {
        if !self.contains(client_id) {
            return Err(HubError::UnknownClient(client_id));
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|e| HubError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(HubError::InvalidJson("expected a JSON object".to_string()));
        }
        let frame: ClientFrame =
            serde_json::from_value(value).map_err(|e| HubError::InvalidJson(e.to_string()))?;

        match frame.kind.as_str() {
            "subscribe" => self.subscribe(client_id, &frame),
            "unsubscribe" => match frame.subscription_id.as_deref() {
                Some(subscription_id) if !subscription_id.is_empty() => {
                    self.unsubscribe(client_id, subscription_id);
                    Ok(())
                }
                _ => Err(HubError::InvalidJson(
                    "unsubscribe requires a subscriptionId".to_string(),
                )),
            },
            "ping" => {
                self.reply(client_id, &ServerMessage::Pong);
                Ok(())
            }
            other => Err(HubError::UnknownType(other.to_string())),
        }
    }

    /// Unsubscribe from the bus and drop every client.
    pub fn close(&self) {
        if let Some(subscription) = self
            .inner
            .bus_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.unsubscribe();
        }
        let dropped = {
            let mut clients = self.clients_mut();
            let count = clients.len();
            clients.clear();
            count
        };
        debug!("hub closed, dropped {} client(s)", dropped);
    }

    pub fn client_count(&self) -> usize {
        self.inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live subscriptions held by a client, `None` for unknown ids.
    pub fn subscription_count(&self, client_id: ClientId) -> Option<usize> {
        self.inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .map(|entry| entry.subscriptions.len())
    }

    fn subscribe(&self, client_id: ClientId, frame: &ClientFrame) -> Result<(), HubError> {
        let channel = frame.channel.as_deref().unwrap_or_default();
        let target = if channel == SESSION_CHANNEL {
            match frame.session_id.as_deref() {
                Some(id) if !id.is_empty() => Target::Session(id.to_string()),
                _ => return Err(HubError::MissingSessionId),
            }
        } else {
            Channel::from_name(channel)
                .map(Target::Bucket)
                .ok_or_else(|| HubError::UnknownChannel(channel.to_string()))?
        };

        let (subscription_id, sink) = {
            let mut clients = self.clients_mut();
            let entry = clients
                .get_mut(&client_id)
                .ok_or(HubError::UnknownClient(client_id))?;
            entry.next_subscription += 1;
            let subscription_id = format!("sub-{}", entry.next_subscription);
            entry
                .subscriptions
                .insert(subscription_id.clone(), target.clone());
            (subscription_id, Arc::clone(&entry.sink))
        };

        debug!(
            "client {} subscribed to {} as {}",
            client_id,
            target.name(),
            subscription_id
        );

        let _ = sink.send(&ServerMessage::Subscribed {
            channel: target.name().to_string(),
            subscription_id,
        });
        Ok(())
    }

    fn unsubscribe(&self, client_id: ClientId, subscription_id: &str) {
        let removed = self
            .clients_mut()
            .get_mut(&client_id)
            .and_then(|entry| entry.subscriptions.remove(subscription_id));
        if removed.is_some() {
            debug!("client {} unsubscribed {}", client_id, subscription_id);
        }
    }

    fn reply(&self, client_id: ClientId, msg: &ServerMessage) {
        let sink = self
            .inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .map(|entry| Arc::clone(&entry.sink));
        if let Some(sink) = sink {
            let _ = sink.send(msg);
        }
    }

    fn contains(&self, client_id: ClientId) -> bool {
        self.inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&client_id)
    }

    fn clients_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_deck_protocol::EventType;
    use serde_json::json;

    /// Sink that records everything written to it.
    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<ServerMessage>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<ServerMessage> {
            std::mem::take(&mut *self.messages.lock().unwrap())
        }
    }

    impl ClientSink for RecordingSink {
        fn send(&self, msg: &ServerMessage) -> Result<(), SinkError> {
            self.messages.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    struct ClosedSink;

    impl ClientSink for ClosedSink {
        fn send(&self, _msg: &ServerMessage) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    fn setup() -> (EventBus, Hub) {
        let bus = EventBus::new();
        let hub = Hub::new(&bus);
        (bus, hub)
    }

    fn connect(hub: &Hub) -> (ClientId, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let id = hub.register_client(sink.clone());
        (id, sink)
    }

    fn subscribed_id(messages: &[ServerMessage]) -> String {
        messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Subscribed {
                    subscription_id, ..
                } => Some(subscription_id.clone()),
                _ => None,
            })
            .expect("no subscribed reply")
    }

    fn events(messages: &[ServerMessage]) -> Vec<(Channel, String)> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Event {
                    channel,
                    event_type,
                    ..
                } => Some((*channel, event_type.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_client_ids_increase() {
        let (_bus, hub) = setup();
        let (a, _) = connect(&hub);
        let (b, _) = connect(&hub);
        assert!(b > a);
        assert_eq!(hub.client_count(), 2);
    }

    #[test]
    fn test_hub_holds_one_bus_subscription() {
        let (bus, hub) = setup();
        assert_eq!(bus.subscriber_count(), 1);
        hub.close();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_replies_with_id() {
        let (_bus, hub) = setup();
        let (id, sink) = connect(&hub);

        hub.handle_message(id, r#"{"type":"subscribe","channel":"sessions"}"#)
            .unwrap();
        hub.handle_message(id, r#"{"type":"subscribe","channel":"tasks"}"#)
            .unwrap();

        assert_eq!(
            sink.take(),
            vec![
                ServerMessage::Subscribed {
                    channel: "sessions".to_string(),
                    subscription_id: "sub-1".to_string(),
                },
                ServerMessage::Subscribed {
                    channel: "tasks".to_string(),
                    subscription_id: "sub-2".to_string(),
                },
            ]
        );
        assert_eq!(hub.subscription_count(id), Some(2));
    }

    #[test]
    fn test_ping_replies_pong() {
        let (_bus, hub) = setup();
        let (id, sink) = connect(&hub);
        hub.handle_message(id, r#"{"type":"ping"}"#).unwrap();
        assert_eq!(sink.take(), vec![ServerMessage::Pong]);
    }

    #[test]
    fn test_routing_and_unsubscribe() {
        let (bus, hub) = setup();
        let (id, sink) = connect(&hub);
        hub.handle_message(id, r#"{"type":"subscribe","channel":"sessions"}"#)
            .unwrap();
        let sub_id = subscribed_id(&sink.take());

        bus.emit(Event::new(
            EventType::SessionStatusChanged,
            "abc",
            json!({"sessionId": "abc", "status": "running"}),
        ));
        bus.emit(Event::global(EventType::TaskCreated, json!({})));

        let received = sink.take();
        assert_eq!(
            events(&received),
            vec![(Channel::Sessions, "status-changed".to_string())]
        );
        if let ServerMessage::Event { data, .. } = &received[0] {
            assert_eq!(data["status"], "running");
        }

        hub.handle_message(
            id,
            &format!(r#"{{"type":"unsubscribe","subscriptionId":"{sub_id}"}}"#),
        )
        .unwrap();
        bus.emit(Event::new(EventType::SessionUpdated, "abc", json!({})));

        assert!(sink.take().is_empty());
        assert_eq!(hub.subscription_count(id), Some(0));
    }

    #[test]
    fn test_per_session_filter() {
        let (bus, hub) = setup();
        let (id, sink) = connect(&hub);
        hub.handle_message(
            id,
            r#"{"type":"subscribe","channel":"session","sessionId":"abc"}"#,
        )
        .unwrap();
        assert_eq!(
            sink.take(),
            vec![ServerMessage::Subscribed {
                channel: "session".to_string(),
                subscription_id: "sub-1".to_string(),
            }]
        );

        bus.emit(Event::new(EventType::UploadProgress, "abc", json!({})));
        bus.emit(Event::new(EventType::UploadProgress, "other", json!({})));
        bus.emit(Event::global(EventType::Heartbeat, json!({})));

        assert_eq!(
            events(&sink.take()),
            vec![(Channel::Uploads, "progress".to_string())]
        );
    }

    #[test]
    fn test_overlapping_subscriptions_deliver_once() {
        let (bus, hub) = setup();
        let (id, sink) = connect(&hub);
        hub.handle_message(id, r#"{"type":"subscribe","channel":"sessions"}"#)
            .unwrap();
        hub.handle_message(
            id,
            r#"{"type":"subscribe","channel":"session","sessionId":"abc"}"#,
        )
        .unwrap();
        sink.take();

        bus.emit(Event::new(EventType::SessionUpdated, "abc", json!({})));
        assert_eq!(events(&sink.take()).len(), 1);
    }

    #[test]
    fn test_only_matching_clients_receive() {
        let (bus, hub) = setup();
        let (a, sink_a) = connect(&hub);
        let (_b, sink_b) = connect(&hub);
        hub.handle_message(a, r#"{"type":"subscribe","channel":"push"}"#)
            .unwrap();
        sink_a.take();

        bus.emit(Event::global(EventType::PushSent, json!({"title": "hi"})));

        assert_eq!(
            events(&sink_a.take()),
            vec![(Channel::Push, "sent".to_string())]
        );
        assert!(sink_b.take().is_empty());
    }

    #[test]
    fn test_errors() {
        let (_bus, hub) = setup();
        let (id, sink) = connect(&hub);

        assert_eq!(
            hub.handle_message(999, r#"{"type":"ping"}"#),
            Err(HubError::UnknownClient(999))
        );
        assert!(matches!(
            hub.handle_message(id, "not json"),
            Err(HubError::InvalidJson(_))
        ));
        assert!(matches!(
            hub.handle_message(id, "[1,2]"),
            Err(HubError::InvalidJson(_))
        ));
        assert_eq!(
            hub.handle_message(id, r#"{"type":"dance"}"#),
            Err(HubError::UnknownType("dance".to_string()))
        );
        assert_eq!(
            hub.handle_message(id, r#"{"type":"subscribe","channel":"nope"}"#),
            Err(HubError::UnknownChannel("nope".to_string()))
        );
        assert_eq!(
            hub.handle_message(id, r#"{"type":"subscribe","channel":"session"}"#),
            Err(HubError::MissingSessionId)
        );
        assert_eq!(
            hub.handle_message(
                id,
                r#"{"type":"subscribe","channel":"session","sessionId":""}"#
            ),
            Err(HubError::MissingSessionId)
        );

        assert!(matches!(
            hub.handle_message(id, r#"{"type":"unsubscribe"}"#),
            Err(HubError::InvalidJson(_))
        ));
        assert!(matches!(
            hub.handle_message(id, r#"{"type":"unsubscribe","subscriptionId":""}"#),
            Err(HubError::InvalidJson(_))
        ));

        // Unknown subscription ids are ignored without a reply.
        hub.handle_message(id, r#"{"type":"unsubscribe","subscriptionId":"sub-42"}"#)
            .unwrap();
        assert!(sink.take().is_empty());
        assert_eq!(HubError::UnknownChannel(String::new()).code(), "UNKNOWN_CHANNEL");
    }

    #[test]
    fn test_failed_writes_are_dropped() {
        let (bus, hub) = setup();
        let closed = hub.register_client(Arc::new(ClosedSink));
        hub.handle_message(closed, r#"{"type":"subscribe","channel":"system"}"#)
            .unwrap();
        let (id, sink) = connect(&hub);
        hub.handle_message(id, r#"{"type":"subscribe","channel":"system"}"#)
            .unwrap();
        sink.take();

        bus.emit(Event::global(EventType::Heartbeat, json!({})));

        assert_eq!(events(&sink.take()).len(), 1);
        // The failing client is not removed by the hub.
        assert_eq!(hub.client_count(), 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (bus, hub) = setup();
        let (id, sink) = connect(&hub);
        hub.handle_message(id, r#"{"type":"subscribe","channel":"system"}"#)
            .unwrap();
        sink.take();

        hub.unregister_client(id);
        hub.unregister_client(id);
        assert_eq!(hub.client_count(), 0);

        bus.emit(Event::global(EventType::Heartbeat, json!({})));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_close_drops_all_clients() {
        let (bus, hub) = setup();
        let (_a, sink) = connect(&hub);
        connect(&hub);
        hub.close();

        assert_eq!(hub.client_count(), 0);
        bus.emit(Event::global(EventType::Heartbeat, json!({})));
        assert!(sink.take().is_empty());
        hub.close();
    }
}
