//! Resource services over the dashboard HTTP API.
//!
//! The backend has shipped two envelope shapes for some endpoints. The
//! wrapped forms (`{"items": [...]}`, `{"statistics": {...}}`) are the
//! canonical ones; the bare forms are still accepted for older backends.

use serde::Deserialize;
use serde_json::Value;

use crate::api_client::{ApiClient, ApiError};
use crate::models::{
    Device, DeviceConfigUpdate, DeviceStatus, NewDevice, NewReading, SensorData, SensorStatistics,
};

/// Readings requested per device when the caller does not say otherwise.
pub const DEFAULT_READINGS_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemsEnvelope<T> {
    Wrapped { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ItemsEnvelope<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Self::Wrapped { items } => items,
            Self::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatisticsEnvelope {
    Wrapped { statistics: SensorStatistics },
    Bare(SensorStatistics),
}

/// Device CRUD and status lookups.
#[derive(Clone, Debug)]
pub struct DeviceService {
    api: ApiClient,
}

impl DeviceService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Device>, ApiError> {
        let envelope: Option<ItemsEnvelope<Device>> = self.api.get("/devices").await?;
        Ok(envelope.map(ItemsEnvelope::into_items).unwrap_or_default())
    }

    pub async fn get(&self, id: &str) -> Result<Device, ApiError> {
        self.api.get(&device_path(id)).await
    }

    pub async fn create(&self, device: &NewDevice) -> Result<Device, ApiError> {
        self.api.post("/devices", device).await
    }

    /// Sends a partial configuration update (WiFi credentials, interval).
    pub async fn update(&self, id: &str, update: &DeviceConfigUpdate) -> Result<Device, ApiError> {
        self.api.put(&device_path(id), update).await
    }

    /// Deletes a device. The backend may answer 204 or echo a JSON body.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let _: Value = self.api.delete(&device_path(id)).await?;
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<DeviceStatus, ApiError> {
        self.api
            .get(&format!("{}/status", device_path(id)))
            .await
    }
}

/// Sensor readings and aggregates.
#[derive(Clone, Debug)]
pub struct SensorService {
    api: ApiClient,
}

impl SensorService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Recent readings, optionally scoped to one device.
    ///
    /// `limit` only applies when a device is given, which is the only case
    /// the backend honours it.
    pub async fn readings(
        &self,
        device_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SensorData>, ApiError> {
        let path = readings_path(device_id, limit);
        let envelope: Option<ItemsEnvelope<SensorData>> = self.api.get(&path).await?;
        Ok(envelope.map(ItemsEnvelope::into_items).unwrap_or_default())
    }

    /// The newest reading for a device, if it has reported at all.
    pub async fn latest(&self, device_id: &str) -> Result<Option<SensorData>, ApiError> {
        let path = format!("/sensors/latest/{}", urlencoding::encode(device_id));
        let readings: Option<Vec<SensorData>> = self.api.get(&path).await?;
        Ok(readings.and_then(|readings| readings.into_iter().next()))
    }

    pub async fn statistics(&self, device_id: &str) -> Result<SensorStatistics, ApiError> {
        let path = format!("/sensors/statistics/{}", urlencoding::encode(device_id));
        let envelope: StatisticsEnvelope = self.api.get(&path).await?;
        Ok(match envelope {
            StatisticsEnvelope::Wrapped { statistics } => statistics,
            StatisticsEnvelope::Bare(statistics) => statistics,
        })
    }

    pub async fn record(&self, reading: &NewReading) -> Result<SensorData, ApiError> {
        self.api.post("/sensors", reading).await
    }
}

fn device_path(id: &str) -> String {
    format!("/devices/{}", urlencoding::encode(id))
}

fn readings_path(device_id: Option<&str>, limit: u32) -> String {
    match device_id {
        Some(device_id) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("deviceId", device_id)
                .append_pair("limit", &limit.to_string())
                .finish();
            format!("/sensors?{query}")
        }
        None => "/sensors".to_string(),
    }
}
