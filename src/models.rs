//! Wire models exchanged with the dashboard backend.
//!
//! Field names follow the backend's camelCase JSON. Timestamps are kept as
//! the ISO-8601 strings the backend sends.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// Poll cadence used for a device that does not report `dataInterval`.
pub const DEFAULT_DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

/// A registered sensor device.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "wifiSSID")]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub wifi_password: Option<SecretString>,
    /// Reporting interval in milliseconds.
    pub data_interval: u64,
    pub last_seen: String,
    pub is_online: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Device {
    /// Interval at which a dashboard should refresh this device's readings.
    pub fn poll_interval(&self) -> Duration {
        if self.data_interval == 0 {
            DEFAULT_DEVICE_POLL_INTERVAL
        } else {
            Duration::from_millis(self.data_interval)
        }
    }
}

/// Body for `POST /devices`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub device_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "wifiSSID", skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret"
    )]
    pub wifi_password: Option<SecretString>,
    pub data_interval: u64,
}

/// Partial body for `PUT /devices/{id}`.
///
/// Only the fields that are set are sent, so a WiFi-only edit leaves the
/// rest of the device untouched.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "wifiSSID", skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret"
    )]
    pub wifi_password: Option<SecretString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_interval: Option<u64>,
}

impl DeviceConfigUpdate {
    /// Update touching only WiFi credentials.
    pub fn wifi(ssid: impl Into<String>, password: SecretString) -> Self {
        Self {
            wifi_ssid: Some(ssid.into()),
            wifi_password: Some(password),
            ..Self::default()
        }
    }

    pub fn with_data_interval(mut self, interval: Duration) -> Self {
        self.data_interval = Some(interval.as_millis() as u64);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.wifi_ssid.is_none()
            && self.wifi_password.is_none()
            && self.data_interval.is_none()
    }
}

/// Response of `GET /devices/{id}/status`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub status: String,
}

/// One sensor reading.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    pub id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
    pub timestamp: String,
    pub created_at: String,
}

/// Body for `POST /sensors`.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewReading {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Aggregates returned by `GET /sensors/statistics/{deviceId}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatistics {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_humidity: Option<f64>,
    pub data_points: u64,
    pub time_range: TimeRange,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Optional list filters; unset fields are left out of the query string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub order: Option<SortOrder>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

fn serialize_secret<S>(value: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}
