//! Client SDK for the IoT sensor dashboard backend.
//!
//! The crate is organized by transport surface:
//! - `api_client`: typed HTTP client with deadlines and response classification.
//! - `services`: device and sensor endpoints on top of `api_client`.
//! - `realtime`: shared Socket.IO connection with a pub/sub handler registry.
//! - `poller` / `live`: periodic refresh and push-triggered device feeds.
//! - `config` / `retry`: environment settings, reconnect and timeout helpers.

/// Typed request client and error classification.
pub mod api_client;
/// Process-wide settings.
pub mod config;
/// Polling plus push refresh for a single device.
pub mod live;
/// Wire models shared by the HTTP services and realtime payloads.
pub mod models;
/// Cancellable periodic refresh tasks.
pub mod poller;
/// Realtime client, Socket.IO codec, and transport.
pub mod realtime;
/// Reconnect policy and timeout helpers used across the SDK.
pub mod retry;
/// Device and sensor resource services.
pub mod services;

pub use api_client::{ApiClient, ApiClientOptions, ApiError, ApiRequest};
pub use config::{ConfigError, DashboardConfig};
pub use live::LiveDeviceFeed;
pub use realtime::{ConnectionState, RealtimeClient, RealtimeError, RealtimeOptions, Subscription};
pub use services::{DeviceService, SensorService};
