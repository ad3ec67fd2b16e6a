//! Shared realtime client: one live link, a handler registry keyed by
//! event type, lazy connect on first subscribe, and device-scoped control
//! messages.
//!
//! Construct one [`RealtimeClient`] per process and hand out clones; every
//! clone observes the same connection and the same registry.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DashboardConfig;
use crate::realtime::proto::{
    DeviceSubscriptionMsg, PacketError, EVENT_SERVER_GREETING, EVENT_SUBSCRIBED,
    SUBSCRIBE_DEVICE, UNSUBSCRIBE_DEVICE,
};
use crate::realtime::registry::{deliver, deliver_named, lock, HandlerEntry, Registry};
use crate::realtime::transport::SocketIoTransport;
use crate::retry::ReconnectPolicy;

const SOCKET_IO_PATH: &str = "socket.io/";
const SOCKET_IO_QUERY: &str = "EIO=4&transport=websocket";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    /// Initial connect in flight, or the link is retrying after a loss.
    Connecting,
    Connected,
}

/// Lifecycle and data notifications a link reports to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Connected,
    Event { name: String, payload: Value },
    /// The session was lost; the link retries per its reconnect policy.
    Disconnected { reason: String },
    ConnectError { message: String },
    /// Reconnect attempts are spent; the link has stopped.
    Exhausted { attempts: usize },
}

pub type EventSink = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Opens links to the realtime server.
///
/// Implementations must report through `sink` from their own task, never
/// synchronously from inside `open`, `emit` or `close`.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        endpoint: &str,
        options: &RealtimeOptions,
        sink: EventSink,
    ) -> Result<Box<dyn Link>, RealtimeError>;
}

/// Handle on one open link.
pub trait Link: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> Result<(), RealtimeError>;
    fn close(&self);
}

#[derive(Clone, Debug)]
pub struct RealtimeOptions {
    pub api_base_url: String,
    /// Used verbatim instead of the endpoint derived from `api_base_url`.
    pub endpoint_override: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for RealtimeOptions {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            api_base_url: config.api_base_url.clone(),
            endpoint_override: None,
            reconnect: config.reconnect.clone(),
            connect_timeout: config.connect_timeout,
        }
    }
}

impl RealtimeOptions {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into().trim_end().to_string());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid realtime endpoint: {0}")]
    Endpoint(String),

    #[error("not connected")]
    NotConnected,

    #[error("link is closed")]
    LinkClosed,

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

struct LinkSlot {
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
    generation: u64,
}

struct Inner {
    endpoint: String,
    options: RealtimeOptions,
    transport: Arc<dyn Transport>,
    slot: Mutex<LinkSlot>,
    registry: Mutex<Registry>,
}

#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl RealtimeClient {
    /// Client backed by the Socket.IO websocket transport.
    pub fn new(options: RealtimeOptions) -> Result<Self, RealtimeError> {
        Self::with_transport(options, Arc::new(SocketIoTransport))
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, RealtimeError> {
        Self::new(RealtimeOptions::from(config))
    }

    pub fn with_transport(
        options: RealtimeOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RealtimeError> {
        let endpoint = match options.endpoint_override.as_deref() {
            Some(endpoint) => endpoint.to_string(),
            None => realtime_endpoint(&options.api_base_url)?,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                options,
                transport,
                slot: Mutex::new(LinkSlot {
                    state: ConnectionState::Disconnected,
                    link: None,
                    generation: 0,
                }),
                registry: Mutex::new(Registry::default()),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.slot).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens the link unless one is already connected or in flight.
    pub fn connect(&self) {
        let generation = {
            let mut slot = lock(&self.inner.slot);
            if slot.state != ConnectionState::Disconnected {
                debug!(event = "realtime_connect_skipped", state = ?slot.state);
                return;
            }
            slot.state = ConnectionState::Connecting;
            slot.generation += 1;
            slot.generation
        };

        info!(event = "realtime_connecting", endpoint = %self.inner.endpoint);
        let sink = Inner::sink(&self.inner, generation);
        let opened = self
            .inner
            .transport
            .open(&self.inner.endpoint, &self.inner.options, sink);

        let mut slot = lock(&self.inner.slot);
        match opened {
            Ok(link) if slot.generation == generation => {
                if let Some(previous) = slot.link.replace(link) {
                    previous.close();
                }
            }
            Ok(stale) => stale.close(),
            Err(err) => {
                warn!(event = "realtime_open_failed", error = %err);
                if slot.generation == generation {
                    slot.state = ConnectionState::Disconnected;
                }
            }
        }
    }

    /// Registers `handler` for `event_type` (use [`WILDCARD`] for every
    /// event) and connects lazily.
    ///
    /// [`WILDCARD`]: crate::realtime::proto::WILDCARD
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let entry = lock(&self.inner.registry).insert(&event_type, Box::new(handler));
        debug!(event = "realtime_subscribed", event_type = %event_type, handler_id = entry.id());

        if !self.is_connected() {
            self.connect();
        }

        Subscription {
            inner: Arc::downgrade(&self.inner),
            event_type,
            entry,
        }
    }

    /// Like [`subscribe`](Self::subscribe), decoding each payload into `T`.
    /// Payloads that do not decode are logged and skipped.
    pub fn subscribe_typed<T, F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let name = event_type.clone();
        self.subscribe(event_type, move |payload| match T::deserialize(payload) {
            Ok(value) => handler(value),
            Err(err) => warn!(
                event = "realtime_payload_rejected",
                event_type = %name,
                error = %err
            ),
        })
    }

    /// Emits `message` when connected. Otherwise the message is dropped
    /// with a warning.
    pub fn send<M: Serialize + ?Sized>(&self, event: &str, message: &M) {
        if let Err(err) = self.try_send(event, message) {
            warn!(event = "realtime_message_dropped", name = event, error = %err);
        }
    }

    /// Like [`send`](Self::send), reporting why a message was not emitted.
    pub fn try_send<M: Serialize + ?Sized>(
        &self,
        event: &str,
        message: &M,
    ) -> Result<(), RealtimeError> {
        let payload = serde_json::to_value(message)?;
        let slot = lock(&self.inner.slot);
        match (slot.state, slot.link.as_ref()) {
            (ConnectionState::Connected, Some(link)) => link.emit(event, payload),
            _ => Err(RealtimeError::NotConnected),
        }
    }

    pub fn subscribe_to_device(&self, device_id: &str) {
        self.send(
            SUBSCRIBE_DEVICE,
            &DeviceSubscriptionMsg {
                device_id: device_id.to_string(),
            },
        );
    }

    pub fn unsubscribe_from_device(&self, device_id: &str) {
        self.send(
            UNSUBSCRIBE_DEVICE,
            &DeviceSubscriptionMsg {
                device_id: device_id.to_string(),
            },
        );
    }

    /// Closes the link and forgets every handler.
    pub fn disconnect(&self) {
        let link = {
            let mut slot = lock(&self.inner.slot);
            slot.generation += 1;
            slot.state = ConnectionState::Disconnected;
            slot.link.take()
        };
        if let Some(link) = link {
            link.close();
            info!(event = "realtime_disconnected", reason = "client request");
        }
        lock(&self.inner.registry).clear();
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        lock(&self.inner.registry).handler_count(event_type)
    }

    pub fn downgrade(&self) -> WeakRealtimeClient {
        WeakRealtimeClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle, for handlers that need to call back into the client
/// without keeping it alive.
#[derive(Clone)]
pub struct WeakRealtimeClient {
    inner: Weak<Inner>,
}

impl WeakRealtimeClient {
    pub fn upgrade(&self) -> Option<RealtimeClient> {
        self.inner.upgrade().map(|inner| RealtimeClient { inner })
    }
}

impl Inner {
    fn sink(this: &Arc<Self>, generation: u64) -> EventSink {
        let inner = Arc::downgrade(this);
        Arc::new(move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.on_link_event(generation, event);
            }
        })
    }

    fn on_link_event(&self, generation: u64, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                if self.transition(generation, ConnectionState::Connected) {
                    info!(event = "realtime_connected", endpoint = %self.endpoint);
                }
            }
            LinkEvent::Event { name, payload } => {
                if !self.is_current(generation) {
                    return;
                }
                match name.as_str() {
                    // Control messages stay out of wildcard fan-out.
                    EVENT_SERVER_GREETING => {
                        debug!(event = "realtime_greeting", payload = %payload);
                        deliver_named(&self.registry, &name, &payload);
                    }
                    EVENT_SUBSCRIBED => {
                        debug!(event = "realtime_device_subscribed", payload = %payload);
                    }
                    _ => deliver(&self.registry, &name, &payload),
                }
            }
            LinkEvent::Disconnected { reason } => {
                if self.transition(generation, ConnectionState::Connecting) {
                    info!(event = "realtime_disconnected", reason = %reason);
                }
            }
            LinkEvent::ConnectError { message } => {
                if self.is_current(generation) {
                    warn!(
                        event = "realtime_connect_error",
                        error = %RealtimeError::Connection(message)
                    );
                }
            }
            LinkEvent::Exhausted { attempts } => {
                let stopped = {
                    let mut slot = lock(&self.slot);
                    if slot.generation != generation {
                        return;
                    }
                    slot.state = ConnectionState::Disconnected;
                    slot.link.take()
                };
                if let Some(link) = stopped {
                    link.close();
                }
                warn!(event = "realtime_reconnect_exhausted", attempts);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.slot).generation == generation
    }

    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let mut slot = lock(&self.slot);
        if slot.generation != generation {
            return false;
        }
        slot.state = state;
        true
    }
}

/// Capability returned by [`RealtimeClient::subscribe`].
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    inner: Weak<Inner>,
    event_type: String,
    entry: Arc<HandlerEntry>,
}

impl Subscription {
    /// Removes this handler. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.entry.deactivate() {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.registry).remove(&self.event_type, self.entry.id());
        }
        debug!(
            event = "realtime_unsubscribed",
            event_type = %self.event_type,
            handler_id = self.entry.id()
        );
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Derives the Socket.IO websocket URL from the HTTP API base: the trailing
/// `/api` segment is dropped and the scheme mapped to `ws`/`wss`.
pub fn realtime_endpoint(api_base_url: &str) -> Result<String, RealtimeError> {
    let trimmed = api_base_url.trim().trim_end_matches('/');
    let root = trimmed.strip_suffix("/api").unwrap_or(trimmed);

    let mut url = Url::parse(root).map_err(|err| RealtimeError::Endpoint(format!("{root}: {err}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::Endpoint(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::Endpoint(format!("cannot switch {root} to {scheme}")))?;

    let path = format!("{}/{SOCKET_IO_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some(SOCKET_IO_QUERY));
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{
        realtime_endpoint, ConnectionState, EventSink, Link, LinkEvent, RealtimeClient,
        RealtimeError, RealtimeOptions, Subscription, Transport,
    };
    use crate::realtime::proto::{
        DeviceEventMsg, EVENT_DEVICE_STATUS, EVENT_SENSOR_DATA, EVENT_SERVER_GREETING,
        EVENT_SUBSCRIBED, WILDCARD,
    };
    use crate::realtime::registry::lock;

    #[derive(Default)]
    struct Recorded {
        sinks: Vec<EventSink>,
        emitted: Vec<(String, Value)>,
        closed: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingTransport {
        recorded: Arc<Mutex<Recorded>>,
        fail_open: bool,
    }

    struct RecordingLink {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl Transport for RecordingTransport {
        fn open(
            &self,
            _endpoint: &str,
            _options: &RealtimeOptions,
            sink: EventSink,
        ) -> Result<Box<dyn Link>, RealtimeError> {
            if self.fail_open {
                return Err(RealtimeError::Runtime("no runtime".to_string()));
            }
            lock(&self.recorded).sinks.push(sink);
            Ok(Box::new(RecordingLink {
                recorded: Arc::clone(&self.recorded),
            }))
        }
    }

    impl Link for RecordingLink {
        fn emit(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
            lock(&self.recorded).emitted.push((event.to_string(), payload));
            Ok(())
        }

        fn close(&self) {
            lock(&self.recorded).closed += 1;
        }
    }

    impl RecordingTransport {
        fn opens(&self) -> usize {
            lock(&self.recorded).sinks.len()
        }

        fn emitted(&self) -> Vec<(String, Value)> {
            lock(&self.recorded).emitted.clone()
        }

        fn push(&self, event: LinkEvent) {
            let sink = lock(&self.recorded)
                .sinks
                .last()
                .cloned()
                .expect("a link was opened");
            sink(event);
        }

        fn push_event(&self, name: &str, payload: Value) {
            self.push(LinkEvent::Event {
                name: name.to_string(),
                payload,
            });
        }
    }

    fn client() -> (RealtimeClient, RecordingTransport) {
        let transport = RecordingTransport::default();
        let client =
            RealtimeClient::with_transport(RealtimeOptions::default(), Arc::new(transport.clone()))
                .expect("build client");
        (client, transport)
    }

    fn counting(client: &RealtimeClient, event_type: &str) -> (Subscription, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let subscription = client.subscribe(event_type, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (subscription, calls)
    }

    #[test]
    fn endpoint_drops_api_suffix_and_maps_scheme() {
        assert_eq!(
            realtime_endpoint("http://localhost:3001/api").expect("derive"),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            realtime_endpoint("https://iot.example.com/backend/api/").expect("derive"),
            "wss://iot.example.com/backend/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            realtime_endpoint("http://10.0.0.5:3001").expect("derive"),
            "ws://10.0.0.5:3001/socket.io/?EIO=4&transport=websocket"
        );
        assert!(realtime_endpoint("ftp://nope/api").is_err());
    }

    #[test]
    fn endpoint_override_is_used_verbatim() {
        let options = RealtimeOptions::default().with_endpoint("ws://127.0.0.1:9/custom  ");
        let client =
            RealtimeClient::with_transport(options, Arc::new(RecordingTransport::default()))
                .expect("build client");
        assert_eq!(client.endpoint(), "ws://127.0.0.1:9/custom");
    }

    #[test]
    fn first_subscribe_connects_once_while_connecting() {
        let (client, transport) = client();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (_sensor, _) = counting(&client, EVENT_SENSOR_DATA);
        assert_eq!(transport.opens(), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);

        let (_status, _) = counting(&client, EVENT_DEVICE_STATUS);
        client.connect();
        assert_eq!(transport.opens(), 1);

        transport.push(LinkEvent::Connected);
        assert!(client.is_connected());
        let (_more, _) = counting(&client, EVENT_SENSOR_DATA);
        assert_eq!(transport.opens(), 1);
    }

    #[test]
    fn events_reach_matching_and_wildcard_handlers() {
        let (client, transport) = client();
        let (_sensor, sensor_calls) = counting(&client, EVENT_SENSOR_DATA);
        let (_status, status_calls) = counting(&client, EVENT_DEVICE_STATUS);

        let tagged = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tagged);
        let _all = client.subscribe(WILDCARD, move |payload| {
            lock(&sink).push(payload.clone());
        });

        transport.push(LinkEvent::Connected);
        transport.push_event(EVENT_SENSOR_DATA, json!({"deviceId": "esp32-01"}));

        assert_eq!(sensor_calls.load(Ordering::SeqCst), 1);
        assert_eq!(status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *lock(&tagged),
            vec![json!({"deviceId": "esp32-01", "type": "sensor-data"})]
        );
    }

    #[test]
    fn control_messages_bypass_wildcard_handlers() {
        let (client, transport) = client();
        let (_greeting, greeting_calls) = counting(&client, EVENT_SERVER_GREETING);
        let (_ack, ack_calls) = counting(&client, EVENT_SUBSCRIBED);

        let tagged = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tagged);
        let _all = client.subscribe(WILDCARD, move |payload| {
            lock(&sink).push(payload["type"].clone());
        });

        transport.push(LinkEvent::Connected);
        transport.push_event(EVENT_SERVER_GREETING, json!({"message": "hello"}));
        transport.push_event(EVENT_SUBSCRIBED, json!({"deviceId": "esp32-01"}));
        transport.push_event(EVENT_DEVICE_STATUS, json!({"deviceId": "esp32-01"}));

        assert_eq!(greeting_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ack_calls.load(Ordering::SeqCst), 0);
        assert_eq!(*lock(&tagged), vec![json!("device-status")]);
    }

    #[test]
    fn self_unsubscribe_during_delivery_stops_later_deliveries() {
        let (client, transport) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&calls);
        let own = Arc::clone(&slot);
        let subscription = client.subscribe(EVENT_SENSOR_DATA, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = lock(&own).as_ref() {
                subscription.unsubscribe();
            }
        });
        *lock(&slot) = Some(subscription);
        let (_sibling, sibling_calls) = counting(&client, EVENT_SENSOR_DATA);

        transport.push_event(EVENT_SENSOR_DATA, json!({"n": 1}));
        transport.push_event(EVENT_SENSOR_DATA, json!({"n": 2}));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sibling_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.handler_count(EVENT_SENSOR_DATA), 1);
    }

    #[test]
    fn unsubscribing_a_later_sibling_mid_delivery_skips_it() {
        let (client, transport) = client();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let target = Arc::clone(&slot);
        let _first = client.subscribe(EVENT_SENSOR_DATA, move |_| {
            if let Some(subscription) = lock(&target).as_ref() {
                subscription.unsubscribe();
            }
        });
        let (second, second_calls) = counting(&client, EVENT_SENSOR_DATA);
        *lock(&slot) = Some(second);

        transport.push_event(EVENT_SENSOR_DATA, Value::Null);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let (client, transport) = client();
        let _bad = client.subscribe(EVENT_SENSOR_DATA, |_| panic!("handler failure"));
        let (_good, good_calls) = counting(&client, EVENT_SENSOR_DATA);

        transport.push_event(EVENT_SENSOR_DATA, Value::Null);
        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drops_empty_types() {
        let (client, _) = client();
        let (subscription, _) = counting(&client, EVENT_DEVICE_STATUS);
        assert_eq!(client.handler_count(EVENT_DEVICE_STATUS), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        assert_eq!(client.handler_count(EVENT_DEVICE_STATUS), 0);
    }

    #[test]
    fn stale_unsubscribe_does_not_touch_new_handlers() {
        let (client, _) = client();
        let (old, _) = counting(&client, EVENT_SENSOR_DATA);
        client.disconnect();
        let (_new, _) = counting(&client, EVENT_SENSOR_DATA);

        old.unsubscribe();
        assert_eq!(client.handler_count(EVENT_SENSOR_DATA), 1);
    }

    #[test]
    fn send_while_disconnected_is_dropped() {
        let (client, transport) = client();
        client.send("subscribe-device", &json!({"deviceId": "x"}));
        client.subscribe_to_device("esp32-01");
        assert!(transport.emitted().is_empty());

        let (_sub, _) = counting(&client, EVENT_SENSOR_DATA);
        client.subscribe_to_device("esp32-01");
        assert!(transport.emitted().is_empty(), "still connecting");
    }

    #[test]
    fn try_send_reports_not_connected() {
        let (client, _) = client();
        assert!(matches!(
            client.try_send("subscribe-device", &json!({"deviceId": "x"})),
            Err(RealtimeError::NotConnected)
        ));
    }

    #[test]
    fn device_helpers_emit_control_messages_when_connected() {
        let (client, transport) = client();
        let (_sub, _) = counting(&client, EVENT_SENSOR_DATA);
        transport.push(LinkEvent::Connected);

        client.subscribe_to_device("esp32-01");
        client.unsubscribe_from_device("esp32-01");

        assert_eq!(
            transport.emitted(),
            vec![
                (
                    "subscribe-device".to_string(),
                    json!({"deviceId": "esp32-01"})
                ),
                (
                    "unsubscribe-device".to_string(),
                    json!({"deviceId": "esp32-01"})
                ),
            ]
        );
    }

    #[test]
    fn disconnect_clears_registry_and_next_subscribe_reconnects() {
        let (client, transport) = client();
        let (_sub, calls) = counting(&client, EVENT_SENSOR_DATA);
        transport.push(LinkEvent::Connected);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.handler_count(EVENT_SENSOR_DATA), 0);
        assert_eq!(lock(&transport.recorded).closed, 1);

        let first_sink = lock(&transport.recorded).sinks[0].clone();
        first_sink(LinkEvent::Event {
            name: EVENT_SENSOR_DATA.to_string(),
            payload: Value::Null,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let (_again, _) = counting(&client, EVENT_SENSOR_DATA);
        assert_eq!(transport.opens(), 2);
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn lost_link_is_connecting_until_exhausted() {
        let (client, transport) = client();
        let (_sub, _) = counting(&client, EVENT_SENSOR_DATA);
        transport.push(LinkEvent::Connected);

        transport.push(LinkEvent::Disconnected {
            reason: "transport close".to_string(),
        });
        assert_eq!(client.state(), ConnectionState::Connecting);
        client.connect();
        assert_eq!(transport.opens(), 1);

        transport.push(LinkEvent::ConnectError {
            message: "refused".to_string(),
        });
        transport.push(LinkEvent::Exhausted { attempts: 5 });
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (_again, _) = counting(&client, EVENT_DEVICE_STATUS);
        assert_eq!(transport.opens(), 2);
    }

    #[test]
    fn failed_open_returns_to_disconnected() {
        let transport = RecordingTransport {
            fail_open: true,
            ..RecordingTransport::default()
        };
        let client =
            RealtimeClient::with_transport(RealtimeOptions::default(), Arc::new(transport))
                .expect("build client");

        let (_sub, _) = counting(&client, EVENT_SENSOR_DATA);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn typed_subscription_skips_undecodable_payloads() {
        let (client, transport) = client();
        let devices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&devices);
        let _sub = client.subscribe_typed(EVENT_SENSOR_DATA, move |event: DeviceEventMsg| {
            lock(&sink).push(event.device_id);
        });

        transport.push_event(EVENT_SENSOR_DATA, json!({"temperature": 1.0}));
        transport.push_event(EVENT_SENSOR_DATA, json!({"deviceId": "esp32-02"}));

        assert_eq!(*lock(&devices), vec!["esp32-02".to_string()]);
    }
}
