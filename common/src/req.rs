// wire types shared by the backend and its device clients
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const MAX_DEVICE_ID_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("device_id is required")]
    MissingDeviceId,
    #[error("device_id must be at most {max} characters")]
    DeviceIdTooLong { max: usize },
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("unknown sensor family '{0}'")]
    UnknownFamily(String),
    #[error("{0}")]
    Invalid(String),
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.trim().is_empty() {
        return Err(ValidationError::MissingDeviceId);
    }
    if device_id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::DeviceIdTooLong {
            max: MAX_DEVICE_ID_LEN,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    Ecg,
    PulseOximeter,
    Max30102,
    Accelerometer,
    DeviceStatus,
}

impl SensorFamily {
    pub const ALL: [SensorFamily; 5] = [
        SensorFamily::Ecg,
        SensorFamily::PulseOximeter,
        SensorFamily::Max30102,
        SensorFamily::Accelerometer,
        SensorFamily::DeviceStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorFamily::Ecg => "ecg",
            SensorFamily::PulseOximeter => "pulse_oximeter",
            SensorFamily::Max30102 => "max30102",
            SensorFamily::Accelerometer => "accelerometer",
            SensorFamily::DeviceStatus => "device_status",
        }
    }
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorFamily {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // path segments use dashes, payloads use underscores
        let normalized = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownFamily(s.to_owned()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Poor,
    Fair,
    #[default]
    Good,
}

impl SignalQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Poor => "poor",
            SignalQuality::Fair => "fair",
            SignalQuality::Good => "good",
        }
    }
}

/// Bulk upload sent by a device. Everything except `device_id` is optional and
/// a missing field means the device has no reading of that kind.
///
/// Numeric fields take either JSON numbers or numeric strings, some firmware
/// builds format their floats by hand.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSensorData {
    #[serde(default)]
    pub device_id: String,

    // ECG
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ecg_heart_rate: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ecg_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecg_signal_quality: Option<SignalQuality>,

    // pulse oximeter
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pulse_heart_rate: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pulse_signal_strength: Option<i32>,

    // MAX30102
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub max30102_heart_rate: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub max30102_spo2: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub red_value: Option<i64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ir_value: Option<i64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>, // °C

    // accelerometer
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub z_axis: Option<f64>,
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,

    // device status
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>, // percent
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub wifi_signal_strength: Option<i32>, // dBm
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>, // percent
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cpu_temperature: Option<f64>, // °C
    #[serde(default, with = "lenient", skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<i64>,
}

impl BulkSensorData {
    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_device_id(&self.device_id)?;

        let floats = [
            ("ecg_heart_rate", self.ecg_heart_rate),
            ("ecg_value", self.ecg_value),
            ("spo2", self.spo2),
            ("pulse_heart_rate", self.pulse_heart_rate),
            ("max30102_heart_rate", self.max30102_heart_rate),
            ("max30102_spo2", self.max30102_spo2),
            ("temperature", self.temperature),
            ("x_axis", self.x_axis),
            ("y_axis", self.y_axis),
            ("z_axis", self.z_axis),
            ("magnitude", self.magnitude),
            ("battery_level", self.battery_level),
            ("memory_usage", self.memory_usage),
            ("cpu_temperature", self.cpu_temperature),
        ];
        match floats
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
        {
            Some((field, _)) => Err(ValidationError::NotFinite { field }),
            None => Ok(()),
        }
    }
}

/// Response to a bulk upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub message: String,
    pub device_id: String,
    pub device_created: bool,
    pub readings_created: Vec<SensorFamily>,
    pub timestamp: String,
}

// ===============================================
// helpers
// ===============================================

/// Optional number that may arrive as a JSON number or as a string.
mod lenient {
    use std::{fmt::Display, str::FromStr};

    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText<T> {
        Number(T),
        Text(String),
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        match Option::<NumberOrText<T>>::deserialize(deserializer) {
            Ok(None) => Ok(None),
            Ok(Some(NumberOrText::Number(n))) => Ok(Some(n)),
            Ok(Some(NumberOrText::Text(text))) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid number {text:?}: {e}"))),
            Err(_) => Err(D::Error::custom("expected a number")),
        }
    }

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        value.serialize(serializer)
    }
}
