//! Live readings for one device: periodic polling plus push-triggered
//! refreshes over the realtime channel.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::models::{Device, SensorData};
use crate::poller::Poller;
use crate::realtime::proto::{DeviceEventMsg, EVENT_SENSOR_DATA, EVENT_SERVER_GREETING};
use crate::realtime::{RealtimeClient, Subscription};
use crate::services::{SensorService, DEFAULT_READINGS_LIMIT};

/// Keeps the latest readings of a device in a watch channel.
///
/// Readings are polled every `interval`; a `sensor-data` push for the same
/// device forces an immediate refresh. The device subscription is renewed
/// on every server greeting, so it survives reconnects. Dropping the feed
/// stops polling and releases its realtime handlers.
pub struct LiveDeviceFeed {
    device_id: String,
    realtime: RealtimeClient,
    poller: Poller,
    subscriptions: Vec<Subscription>,
    readings: watch::Receiver<Vec<SensorData>>,
}

impl LiveDeviceFeed {
    /// Must be called from within a tokio runtime.
    pub fn start(
        realtime: &RealtimeClient,
        sensors: SensorService,
        device_id: impl Into<String>,
        interval: Duration,
        limit: u32,
    ) -> Self {
        let device_id = device_id.into();
        let (readings_tx, readings) = watch::channel(Vec::new());

        let fetch_id = device_id.clone();
        let poller = Poller::spawn(
            format!("sensors:{device_id}"),
            interval,
            move || {
                let sensors = sensors.clone();
                let device_id = fetch_id.clone();
                async move { sensors.readings(Some(&device_id), limit).await }
            },
            move |result| {
                if let Ok(latest) = result {
                    let _ = readings_tx.send(latest);
                }
            },
        );

        let trigger = poller.trigger_handle();
        let push_id = device_id.clone();
        let push = realtime.subscribe_typed(EVENT_SENSOR_DATA, move |event: DeviceEventMsg| {
            if event.device_id == push_id {
                trigger.trigger();
            }
        });

        let client = realtime.downgrade();
        let greeting_id = device_id.clone();
        let greeting = realtime.subscribe(EVENT_SERVER_GREETING, move |_| {
            if let Some(client) = client.upgrade() {
                client.subscribe_to_device(&greeting_id);
            }
        });

        realtime.subscribe_to_device(&device_id);
        debug!(event = "live_feed_started", device_id = %device_id);

        Self {
            device_id,
            realtime: realtime.clone(),
            poller,
            subscriptions: vec![push, greeting],
            readings,
        }
    }

    /// Feed at the device's own reporting interval.
    pub fn for_device(realtime: &RealtimeClient, sensors: SensorService, device: &Device) -> Self {
        Self::start(
            realtime,
            sensors,
            device.device_id.clone(),
            device.poll_interval(),
            DEFAULT_READINGS_LIMIT,
        )
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn readings(&self) -> watch::Receiver<Vec<SensorData>> {
        self.readings.clone()
    }

    pub fn refresh(&self) {
        self.poller.trigger();
    }
}

impl Drop for LiveDeviceFeed {
    fn drop(&mut self) {
        self.poller.cancel();
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.realtime.unsubscribe_from_device(&self.device_id);
        debug!(event = "live_feed_stopped", device_id = %self.device_id);
    }
}
