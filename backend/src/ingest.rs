//! Turns a bulk upload into the rows it produces.
//!
//! Each sensor family is decided on its own; one family being present never
//! gates another. The zero checks for the biometric families follow the
//! firmware, which reports `0` while no finger is on the sensor.

use common::req::{BulkSensorData, SensorFamily};

use crate::db::models::*;

pub const DEFAULT_PULSE_SIGNAL_STRENGTH: i32 = 50;

/// Rows for one ingestion call, all stamped with the same server time.
#[derive(Debug, Clone, Default)]
pub struct ReadingBatch {
    pub ecg: Option<NewEcgReading>,
    pub pulse_oximeter: Option<NewPulseOximeterReading>,
    pub max30102: Option<NewMax30102Reading>,
    pub accelerometer: Option<NewAccelerometerReading>,
    pub device_status: Option<NewDeviceStatus>,
}

impl ReadingBatch {
    /// Families in the order they are written.
    pub fn families(&self) -> Vec<SensorFamily> {
        let present = [
            (SensorFamily::Ecg, self.ecg.is_some()),
            (SensorFamily::PulseOximeter, self.pulse_oximeter.is_some()),
            (SensorFamily::Max30102, self.max30102.is_some()),
            (SensorFamily::Accelerometer, self.accelerometer.is_some()),
            (SensorFamily::DeviceStatus, self.device_status.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(family, present)| present.then_some(family))
            .collect()
    }
}

fn nonzero(value: Option<f64>) -> bool {
    value.is_some_and(|v| v != 0.0)
}

fn nonzero_int(value: Option<i64>) -> bool {
    value.is_some_and(|v| v != 0)
}

pub fn magnitude(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

pub fn plan(data: &BulkSensorData, timestamp: i64) -> ReadingBatch {
    let device_id = &data.device_id;
    let mut batch = ReadingBatch::default();

    if nonzero(data.ecg_heart_rate) || nonzero(data.ecg_value) {
        batch.ecg = Some(NewEcgReading {
            device_id: device_id.clone(),
            timestamp,
            heart_rate: data.ecg_heart_rate.unwrap_or_default(),
            ecg_value: data.ecg_value.unwrap_or_default(),
            signal_quality: data
                .ecg_signal_quality
                .unwrap_or_default()
                .as_str()
                .to_owned(),
        });
    }

    if nonzero(data.spo2) || nonzero(data.pulse_heart_rate) {
        batch.pulse_oximeter = Some(NewPulseOximeterReading {
            device_id: device_id.clone(),
            timestamp,
            spo2: data.spo2.unwrap_or_default(),
            heart_rate: data.pulse_heart_rate.unwrap_or_default(),
            signal_strength: data
                .pulse_signal_strength
                .unwrap_or(DEFAULT_PULSE_SIGNAL_STRENGTH),
        });
    }

    if nonzero(data.max30102_heart_rate) || nonzero_int(data.red_value) || nonzero_int(data.ir_value)
    {
        batch.max30102 = Some(NewMax30102Reading {
            device_id: device_id.clone(),
            timestamp,
            heart_rate: data.max30102_heart_rate.unwrap_or_default(),
            spo2: data.max30102_spo2,
            red_value: data.red_value.unwrap_or_default(),
            ir_value: data.ir_value.unwrap_or_default(),
            temperature: data.temperature,
        });
    }

    if data.x_axis.is_some() || data.y_axis.is_some() || data.z_axis.is_some() {
        let x = data.x_axis.unwrap_or_default();
        let y = data.y_axis.unwrap_or_default();
        let z = data.z_axis.unwrap_or_default();
        batch.accelerometer = Some(NewAccelerometerReading {
            device_id: device_id.clone(),
            timestamp,
            x_axis: x,
            y_axis: y,
            z_axis: z,
            magnitude: data.magnitude.unwrap_or_else(|| magnitude(x, y, z)),
        });
    }

    if data.battery_level.is_some()
        || data.wifi_signal_strength.is_some()
        || data.memory_usage.is_some()
    {
        batch.device_status = Some(NewDeviceStatus {
            device_id: device_id.clone(),
            timestamp,
            battery_level: data.battery_level,
            wifi_signal_strength: data.wifi_signal_strength,
            memory_usage: data.memory_usage,
            cpu_temperature: data.cpu_temperature,
            uptime_seconds: data.uptime_seconds,
        });
    }

    batch
}
