use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::*;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub is_active: bool,
    pub created_at: i64, // ms
    pub last_seen: i64,  // ms
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub is_active: bool,
    pub created_at: i64,
    pub last_seen: i64,
}

pub const DEFAULT_DEVICE_TYPE: &str = "ESP32";

impl NewDevice {
    /// Registry defaults for a device that shows up through ingestion.
    pub fn with_defaults(device_id: &str, now: i64) -> Self {
        Self {
            device_id: device_id.to_owned(),
            name: format!("IoT Device {device_id}"),
            device_type: DEFAULT_DEVICE_TYPE.to_owned(),
            is_active: true,
            created_at: now,
            last_seen: now,
        }
    }
}

/// Body of `POST /api/devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub is_active: Option<bool>,
}

impl DeviceRegistration {
    pub fn into_new_device(self, now: i64) -> NewDevice {
        let mut device = NewDevice::with_defaults(&self.device_id, now);
        if let Some(name) = self.name {
            device.name = name;
        }
        if let Some(device_type) = self.device_type {
            device.device_type = device_type;
        }
        if let Some(is_active) = self.is_active {
            device.is_active = is_active;
        }
        device
    }
}

/// Partial update of the administrative fields of a device.
#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = devices)]
pub struct DeviceChanges {
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub is_active: Option<bool>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.device_type.is_none() && self.is_active.is_none()
    }
}

// ===============================================
// readings
// ===============================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = ecg_readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EcgReading {
    pub id: i64,
    pub device_id: String,
    pub timestamp: i64,
    pub heart_rate: f64, // BPM
    pub ecg_value: f64,
    pub signal_quality: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ecg_readings)]
pub struct NewEcgReading {
    pub device_id: String,
    pub timestamp: i64,
    pub heart_rate: f64,
    pub ecg_value: f64,
    pub signal_quality: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = pulse_oximeter_readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PulseOximeterReading {
    pub id: i64,
    pub device_id: String,
    pub timestamp: i64,
    pub spo2: f64,       // percent
    pub heart_rate: f64, // BPM
    pub signal_strength: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pulse_oximeter_readings)]
pub struct NewPulseOximeterReading {
    pub device_id: String,
    pub timestamp: i64,
    pub spo2: f64,
    pub heart_rate: f64,
    pub signal_strength: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = max30102_readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Max30102Reading {
    pub id: i64,
    pub device_id: String,
    pub timestamp: i64,
    pub heart_rate: f64,
    pub spo2: Option<f64>,
    pub red_value: i64,
    pub ir_value: i64,
    pub temperature: Option<f64>, // °C
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = max30102_readings)]
pub struct NewMax30102Reading {
    pub device_id: String,
    pub timestamp: i64,
    pub heart_rate: f64,
    pub spo2: Option<f64>,
    pub red_value: i64,
    pub ir_value: i64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = accelerometer_readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AccelerometerReading {
    pub id: i64,
    pub device_id: String,
    pub timestamp: i64,
    pub x_axis: f64, // g
    pub y_axis: f64, // g
    pub z_axis: f64, // g
    pub magnitude: f64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = accelerometer_readings)]
pub struct NewAccelerometerReading {
    pub device_id: String,
    pub timestamp: i64,
    pub x_axis: f64,
    pub y_axis: f64,
    pub z_axis: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = device_status)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceStatus {
    pub id: i64,
    pub device_id: String,
    pub timestamp: i64,
    pub battery_level: Option<f64>,       // percent
    pub wifi_signal_strength: Option<i32>, // dBm
    pub memory_usage: Option<f64>,        // percent
    pub cpu_temperature: Option<f64>,     // °C
    pub uptime_seconds: Option<i64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = device_status)]
pub struct NewDeviceStatus {
    pub device_id: String,
    pub timestamp: i64,
    pub battery_level: Option<f64>,
    pub wifi_signal_strength: Option<i32>,
    pub memory_usage: Option<f64>,
    pub cpu_temperature: Option<f64>,
    pub uptime_seconds: Option<i64>,
}

/// Newest row of every family, `None` where a family has no data yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub ecg: Option<EcgReading>,
    pub pulse_oximeter: Option<PulseOximeterReading>,
    pub max30102: Option<Max30102Reading>,
    pub accelerometer: Option<AccelerometerReading>,
    pub device_status: Option<DeviceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecentReadings {
    pub ecg_readings: Vec<EcgReading>,
    pub pulse_oximeter_readings: Vec<PulseOximeterReading>,
    pub max30102_readings: Vec<Max30102Reading>,
    pub accelerometer_readings: Vec<AccelerometerReading>,
    pub device_status: Vec<DeviceStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_devices: i64,
    pub total_readings: i64,
    pub ecg_readings: i64,
    pub pulse_oximeter_readings: i64,
    pub max30102_readings: i64,
    pub accelerometer_readings: i64,
    pub device_status_reports: i64,
}

/// Rows of a single family, serialized as a plain array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FamilyReadings {
    Ecg(Vec<EcgReading>),
    PulseOximeter(Vec<PulseOximeterReading>),
    Max30102(Vec<Max30102Reading>),
    Accelerometer(Vec<AccelerometerReading>),
    DeviceStatus(Vec<DeviceStatus>),
}
