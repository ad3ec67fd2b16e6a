//! Realtime device event modules.
//!
//! - `client`: shared connection, handler registry, device subscriptions.
//! - `proto`: Socket.IO packet codec and dashboard event names.
//! - `registry`: handler bookkeeping and fan-out.
//! - `transport`: websocket worker with heartbeat and bounded reconnects.

/// Shared realtime client and transport seam.
pub mod client;
/// Socket.IO framing and event payloads.
pub mod proto;
mod registry;
/// Socket.IO websocket transport.
pub mod transport;

pub use client::{
    realtime_endpoint, ConnectionState, EventSink, Link, LinkEvent, RealtimeClient, RealtimeError,
    RealtimeOptions, Subscription, Transport, WeakRealtimeClient,
};
pub use registry::Handler;
