use std::sync::{Arc, Mutex};

use actix_web::{
    delete, get,
    http::header::ContentType,
    post, put,
    web::{self, Data, Json, Path, Query},
    HttpResponse, Responder,
};
use common::req::{validate_device_id, BulkSensorData, IngestSummary, SensorFamily, ValidationError};
use serde::Serialize;

use crate::{
    config::SensorSource,
    db::{models, Db},
    error::{ApiError, ApiResult},
    ingest,
    utils::{format_ms, ms_since_epoch},
};

pub type SharedDb = Arc<Mutex<Db>>;

/// Plain-text answer when a sensor has not reported yet.
pub const NO_DATA: f64 = 0.0;

pub const DEFAULT_READINGS_LIMIT: i64 = 100;
pub const MAX_READINGS_LIMIT: i64 = 1000;

/// Runs `f` on the blocking pool with the store locked.
async fn with_db<T, F>(db: &Data<SharedDb>, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut Db) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.get_ref().clone();
    web::block(move || {
        let mut db = db
            .lock()
            .map_err(|_| ApiError::Unavailable("database lock poisoned".to_owned()))?;
        f(&mut db)
    })
    .await?
}

fn ensure_device(db: &mut Db, device_id: &str) -> ApiResult<()> {
    match db.find_device(device_id)? {
        Some(_) => Ok(()),
        None => Err(ApiError::DeviceNotFound(device_id.to_owned())),
    }
}

// ===============================================
// single values
// ===============================================

/// One number served as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorValue {
    Ecg,
    Spo2,
    Pulse,
    Max30102,
    AccelX,
    AccelY,
    AccelZ,
    AccelMagnitude,
}

impl SensorValue {
    pub fn from_sensor(name: &str) -> Option<Self> {
        match name {
            "ecg" => Some(SensorValue::Ecg),
            "spo2" => Some(SensorValue::Spo2),
            "pulse" => Some(SensorValue::Pulse),
            "max30102" => Some(SensorValue::Max30102),
            _ => None,
        }
    }

    pub fn from_axis(axis: &str) -> Option<Self> {
        match axis {
            "x" => Some(SensorValue::AccelX),
            "y" => Some(SensorValue::AccelY),
            "z" => Some(SensorValue::AccelZ),
            "magnitude" => Some(SensorValue::AccelMagnitude),
            _ => None,
        }
    }

    /// Demo values for client bring-up.
    pub fn stub(&self) -> f64 {
        match self {
            SensorValue::Ecg => 75.0,
            SensorValue::Spo2 => 98.5,
            SensorValue::Pulse => 74.0,
            SensorValue::Max30102 => 72.0,
            SensorValue::AccelX => 0.15,
            SensorValue::AccelY => -0.08,
            SensorValue::AccelZ => 9.81,
            SensorValue::AccelMagnitude => ingest::magnitude(0.15, -0.08, 9.81),
        }
    }

    /// Picks this value out of a latest-readings snapshot.
    pub fn read(&self, latest: &models::LatestReadings) -> Option<f64> {
        let accel = latest.accelerometer.as_ref();
        match self {
            SensorValue::Ecg => latest.ecg.as_ref().map(|r| r.heart_rate),
            SensorValue::Spo2 => latest.pulse_oximeter.as_ref().map(|r| r.spo2),
            SensorValue::Pulse => latest.pulse_oximeter.as_ref().map(|r| r.heart_rate),
            SensorValue::Max30102 => latest.max30102.as_ref().map(|r| r.heart_rate),
            SensorValue::AccelX => accel.map(|r| r.x_axis),
            SensorValue::AccelY => accel.map(|r| r.y_axis),
            SensorValue::AccelZ => accel.map(|r| r.z_axis),
            SensorValue::AccelMagnitude => accel.map(|r| r.magnitude),
        }
    }

    fn latest(&self, db: &mut Db, device_id: Option<&str>) -> ApiResult<Option<f64>> {
        let value = match self {
            SensorValue::Ecg => db.latest_ecg(device_id)?.map(|r| r.heart_rate),
            SensorValue::Spo2 => db.latest_pulse_oximeter(device_id)?.map(|r| r.spo2),
            SensorValue::Pulse => db.latest_pulse_oximeter(device_id)?.map(|r| r.heart_rate),
            SensorValue::Max30102 => db.latest_max30102(device_id)?.map(|r| r.heart_rate),
            SensorValue::AccelX => db.latest_accelerometer(device_id)?.map(|r| r.x_axis),
            SensorValue::AccelY => db.latest_accelerometer(device_id)?.map(|r| r.y_axis),
            SensorValue::AccelZ => db.latest_accelerometer(device_id)?.map(|r| r.z_axis),
            SensorValue::AccelMagnitude => {
                db.latest_accelerometer(device_id)?.map(|r| r.magnitude)
            }
        };
        Ok(value)
    }
}

#[derive(serde::Deserialize, Debug)]
struct DeviceFilter {
    device_id: Option<String>,
}

async fn sensor_value(
    sensor: SensorValue,
    filter: DeviceFilter,
    source: SensorSource,
    db: &Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let value = match source {
        SensorSource::Stub => sensor.stub(),
        SensorSource::Live => {
            with_db(db, move |db| {
                let device_id = filter.device_id.as_deref();
                if let Some(device_id) = device_id {
                    ensure_device(db, device_id)?;
                }
                Ok(sensor.latest(db, device_id)?.unwrap_or(NO_DATA))
            })
            .await?
        }
    };

    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(value.to_string()))
}

#[get("/api/sensors/accel/{axis}")]
async fn api_sensor_axis(
    axis: Path<String>,
    query: Query<DeviceFilter>,
    source: Data<SensorSource>,
    db: Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let sensor = SensorValue::from_axis(&axis)
        .ok_or_else(|| ApiError::UnknownSensor(format!("accel/{axis}")))?;
    sensor_value(sensor, query.into_inner(), **source, &db).await
}

// ===============================================
// ingestion
// ===============================================

/// Only a JSON object is a payload; serde would also fill the struct from an array.
fn bulk_payload(body: serde_json::Value) -> Result<BulkSensorData, ValidationError> {
    if !body.is_object() {
        return Err(ValidationError::Invalid(
            "payload must be a JSON object".to_owned(),
        ));
    }
    let data: BulkSensorData = serde_json::from_value(body)
        .map_err(|e| ValidationError::Invalid(format!("invalid payload: {e}")))?;
    data.validate()?;
    Ok(data)
}

#[post("/api/sensors/bulk")]
async fn api_sensors_bulk(
    payload: Json<serde_json::Value>,
    db: Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let data = bulk_payload(payload.into_inner())?;

    let outcome = with_db(&db, move |db| Ok(db.ingest(&data)?)).await?;

    if outcome.created {
        log::info!("registered device {}", outcome.device.device_id);
    }
    log::debug!(
        "ingest from {} (created: {}): {:?}",
        outcome.device.device_id,
        outcome.created,
        outcome.families
    );

    Ok(HttpResponse::Created().json(IngestSummary {
        message: "Sensor data received successfully".to_owned(),
        device_id: outcome.device.device_id,
        device_created: outcome.created,
        readings_created: outcome.families,
        timestamp: format_ms(outcome.timestamp),
    }))
}

// ===============================================
// readings
// ===============================================

#[get("/api/sensors/latest")]
async fn api_sensors_latest(
    query: Query<DeviceFilter>,
    db: Data<SharedDb>,
) -> ApiResult<Json<models::LatestReadings>> {
    let filter = query.into_inner();
    let latest = with_db(&db, move |db| {
        let device_id = filter.device_id.as_deref();
        if let Some(device_id) = device_id {
            ensure_device(db, device_id)?;
        }
        Ok(db.latest_readings(device_id)?)
    })
    .await?;
    Ok(Json(latest))
}

// registered after the fixed /api/sensors/* routes
#[get("/api/sensors/{sensor}")]
async fn api_sensor(
    sensor: Path<String>,
    query: Query<DeviceFilter>,
    source: Data<SensorSource>,
    db: Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let value = SensorValue::from_sensor(&sensor)
        .ok_or_else(|| ApiError::UnknownSensor(sensor.into_inner()))?;
    sensor_value(value, query.into_inner(), **source, &db).await
}

#[derive(serde::Deserialize, Debug)]
struct ReadingsQuery {
    device_id: Option<String>,
    limit: Option<i64>,
}

fn readings_limit(limit: Option<i64>) -> Result<i64, ValidationError> {
    let limit = limit.unwrap_or(DEFAULT_READINGS_LIMIT);
    if !(1..=MAX_READINGS_LIMIT).contains(&limit) {
        return Err(ValidationError::Invalid(format!(
            "limit must be between 1 and {MAX_READINGS_LIMIT}"
        )));
    }
    Ok(limit)
}

#[get("/api/readings/{family}")]
async fn api_family_readings(
    family: Path<String>,
    query: Query<ReadingsQuery>,
    db: Data<SharedDb>,
) -> ApiResult<Json<models::FamilyReadings>> {
    let family = family
        .parse::<SensorFamily>()
        .map_err(|_| ApiError::UnknownSensor(family.into_inner()))?;
    let query = query.into_inner();
    let limit = readings_limit(query.limit)?;

    let readings = with_db(&db, move |db| {
        let device_id = query.device_id.as_deref();
        if let Some(device_id) = device_id {
            ensure_device(db, device_id)?;
        }
        Ok(db.family_readings(family, device_id, limit)?)
    })
    .await?;
    Ok(Json(readings))
}

// ===============================================
// devices
// ===============================================

#[derive(serde::Deserialize, Debug)]
struct DeviceListQuery {
    active: Option<bool>,
}

#[get("/api/devices")]
async fn api_devices(
    query: Query<DeviceListQuery>,
    db: Data<SharedDb>,
) -> ApiResult<Json<Vec<models::Device>>> {
    let active_only = query.active.unwrap_or(false);
    let devices = with_db(&db, move |db| Ok(db.list_devices(active_only)?)).await?;
    Ok(Json(devices))
}

fn validate_name(name: Option<&str>) -> Result<(), ValidationError> {
    if name.is_some_and(|name| name.trim().is_empty()) {
        return Err(ValidationError::Invalid("name must not be empty".to_owned()));
    }
    Ok(())
}

#[post("/api/devices")]
async fn api_create_device(
    registration: Json<models::DeviceRegistration>,
    db: Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let registration = registration.into_inner();
    validate_device_id(&registration.device_id)?;
    validate_name(registration.name.as_deref())?;

    let device_id = registration.device_id.clone();
    let new_device = registration.into_new_device(ms_since_epoch());
    let device = with_db(&db, move |db| Ok(db.create_device(&new_device)?))
        .await?
        .ok_or(ApiError::DeviceExists(device_id))?;

    log::info!("registered device {}", device.device_id);
    Ok(HttpResponse::Created().json(device))
}

#[get("/api/devices/{device_id}")]
async fn api_device(path: Path<String>, db: Data<SharedDb>) -> ApiResult<Json<models::Device>> {
    let device_id = path.into_inner();
    let device = with_db(&db, move |db| {
        db.find_device(&device_id)?
            .ok_or(ApiError::DeviceNotFound(device_id))
    })
    .await?;
    Ok(Json(device))
}

#[put("/api/devices/{device_id}")]
async fn api_update_device(
    path: Path<String>,
    changes: Json<models::DeviceChanges>,
    db: Data<SharedDb>,
) -> ApiResult<Json<models::Device>> {
    let device_id = path.into_inner();
    let changes = changes.into_inner();
    validate_name(changes.name.as_deref())?;

    let device = with_db(&db, move |db| {
        db.update_device(&device_id, &changes)?
            .ok_or(ApiError::DeviceNotFound(device_id))
    })
    .await?;
    Ok(Json(device))
}

#[delete("/api/devices/{device_id}")]
async fn api_delete_device(path: Path<String>, db: Data<SharedDb>) -> ApiResult<HttpResponse> {
    let device_id = path.into_inner();
    let deleted = {
        let device_id = device_id.clone();
        with_db(&db, move |db| Ok(db.delete_device(&device_id)?)).await?
    };
    if !deleted {
        return Err(ApiError::DeviceNotFound(device_id));
    }

    log::info!("deleted device {device_id}");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/devices/{device_id}/latest")]
async fn api_device_latest(
    path: Path<String>,
    db: Data<SharedDb>,
) -> ApiResult<Json<models::LatestReadings>> {
    let device_id = path.into_inner();
    let latest = with_db(&db, move |db| {
        ensure_device(db, &device_id)?;
        Ok(db.latest_readings(Some(&device_id))?)
    })
    .await?;
    Ok(Json(latest))
}

/// Column order of the `/raw` line.
pub const RAW_VALUES: [SensorValue; 6] = [
    SensorValue::Ecg,
    SensorValue::Spo2,
    SensorValue::Max30102,
    SensorValue::AccelX,
    SensorValue::AccelY,
    SensorValue::AccelZ,
];

fn csv_line(values: impl IntoIterator<Item = f64>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Latest values of one device as a single CSV line, for clients that
/// cannot afford a request per sensor.
#[get("/api/devices/{device_id}/raw")]
async fn api_device_raw(
    path: Path<String>,
    source: Data<SensorSource>,
    db: Data<SharedDb>,
) -> ApiResult<HttpResponse> {
    let line = match **source {
        SensorSource::Stub => csv_line(RAW_VALUES.iter().map(SensorValue::stub)),
        SensorSource::Live => {
            let device_id = path.into_inner();
            with_db(&db, move |db| {
                ensure_device(db, &device_id)?;
                let latest = db.latest_readings(Some(&device_id))?;
                Ok(csv_line(
                    RAW_VALUES
                        .iter()
                        .map(|value| value.read(&latest).unwrap_or(NO_DATA)),
                ))
            })
            .await?
        }
    };

    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(line))
}

#[derive(Debug, Serialize)]
struct DeviceReadings {
    device: models::Device,
    #[serde(flatten)]
    readings: models::RecentReadings,
}

#[derive(serde::Deserialize, Debug)]
struct LimitQuery {
    limit: Option<i64>,
}

#[get("/api/devices/{device_id}/readings")]
async fn api_device_readings(
    path: Path<String>,
    query: Query<LimitQuery>,
    db: Data<SharedDb>,
) -> ApiResult<Json<DeviceReadings>> {
    let device_id = path.into_inner();
    let limit = readings_limit(query.limit)?;

    let readings = with_db(&db, move |db| {
        let device = db
            .find_device(&device_id)?
            .ok_or_else(|| ApiError::DeviceNotFound(device_id.clone()))?;
        let readings = db.recent_readings(Some(&device_id), limit)?;
        Ok(DeviceReadings { device, readings })
    })
    .await?;
    Ok(Json(readings))
}

// ===============================================
// service
// ===============================================

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: String,
    pub database: String,
    pub statistics: models::Statistics,
    pub version: String,
}

#[get("/api/health")]
async fn api_health(db: Data<SharedDb>) -> impl Responder {
    let report = with_db(&db, |db| {
        let database = match db.ping() {
            Ok(()) => "healthy".to_owned(),
            Err(e) => format!("error: {e}"),
        };
        let statistics = db.statistics().unwrap_or_else(|e| {
            log::warn!("failed to count rows: {e}");
            models::Statistics::default()
        });
        Ok((database, statistics))
    })
    .await;

    let (database, statistics) =
        report.unwrap_or_else(|e| (format!("error: {e}"), models::Statistics::default()));

    Json(HealthReport {
        status: if database == "healthy" { "healthy" } else { "degraded" }.to_owned(),
        timestamp: format_ms(ms_since_epoch()),
        database,
        statistics,
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

#[get("/api")]
async fn api_overview() -> impl Responder {
    Json(serde_json::json!({
        "message": "IoT Sensor Data API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "bulk_sensor_data": "POST /api/sensors/bulk",
            "devices": "/api/devices",
            "device": "/api/devices/{device_id}",
            "device_latest": "/api/devices/{device_id}/latest",
            "device_readings": "/api/devices/{device_id}/readings",
            "device_raw": "/api/devices/{device_id}/raw",
            "family_readings": "/api/readings/{family}",
            "latest": "/api/sensors/latest",
            "ecg": "/api/sensors/ecg",
            "spo2": "/api/sensors/spo2",
            "pulse": "/api/sensors/pulse",
            "max30102": "/api/sensors/max30102",
            "accelerometer": "/api/sensors/accel/{x|y|z|magnitude}",
            "health": "/api/health",
        },
        "documentation": {
            "bulk_data_format": {
                "device_id": "string (required)",
                "ecg_heart_rate": "float (optional)",
                "ecg_value": "float (optional)",
                "ecg_signal_quality": "poor|fair|good (optional)",
                "spo2": "float (optional)",
                "pulse_heart_rate": "float (optional)",
                "pulse_signal_strength": "int (optional)",
                "max30102_heart_rate": "float (optional)",
                "max30102_spo2": "float (optional)",
                "red_value": "int (optional)",
                "ir_value": "int (optional)",
                "temperature": "float (optional)",
                "x_axis": "float (optional)",
                "y_axis": "float (optional)",
                "z_axis": "float (optional)",
                "magnitude": "float (optional)",
                "battery_level": "float (optional)",
                "wifi_signal_strength": "int (optional)",
                "memory_usage": "float (optional)",
                "cpu_temperature": "float (optional)",
                "uptime_seconds": "int (optional)",
            },
            "no_data_value": NO_DATA,
        }
    }))
}

/// Registration order matters: fixed `/api/sensors/*` paths go before
/// `/api/sensors/{sensor}`.
pub fn services(cfg: &mut web::ServiceConfig) {
    cfg.service(api_overview)
        .service(api_health)
        .service(api_sensors_bulk)
        .service(api_sensors_latest)
        .service(api_sensor_axis)
        .service(api_sensor)
        .service(api_family_readings)
        .service(api_devices)
        .service(api_create_device)
        .service(api_device)
        .service(api_update_device)
        .service(api_delete_device)
        .service(api_device_latest)
        .service(api_device_raw)
        .service(api_device_readings);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_names() {
        assert_eq!(SensorValue::from_sensor("ecg"), Some(SensorValue::Ecg));
        assert_eq!(SensorValue::from_sensor("spo2"), Some(SensorValue::Spo2));
        assert_eq!(SensorValue::from_sensor("accel"), None);
        assert_eq!(SensorValue::from_axis("z"), Some(SensorValue::AccelZ));
        assert_eq!(SensorValue::from_axis("w"), None);
    }

    #[test]
    fn test_stub_magnitude_matches_stub_axes() {
        let expected = (0.15f64 * 0.15 + 0.08 * 0.08 + 9.81 * 9.81).sqrt();
        assert!((SensorValue::AccelMagnitude.stub() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_readings_limit() {
        assert_eq!(readings_limit(None), Ok(DEFAULT_READINGS_LIMIT));
        assert_eq!(readings_limit(Some(5)), Ok(5));
        assert!(readings_limit(Some(0)).is_err());
        assert!(readings_limit(Some(MAX_READINGS_LIMIT + 1)).is_err());
    }

    #[test]
    fn test_bulk_payload_must_be_object() {
        let data = bulk_payload(serde_json::json!({ "device_id": "D1", "spo2": "98.5" })).unwrap();
        assert_eq!(data.device_id, "D1");
        assert_eq!(data.spo2, Some(98.5));

        for body in [
            serde_json::json!(["D_ARR", 75.5]),
            serde_json::json!("D1"),
            serde_json::json!(null),
        ] {
            assert_eq!(
                bulk_payload(body),
                Err(ValidationError::Invalid(
                    "payload must be a JSON object".to_owned()
                ))
            );
        }
        assert_eq!(
            bulk_payload(serde_json::json!({ "spo2": 98.5 })),
            Err(ValidationError::MissingDeviceId)
        );
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name(None).is_ok());
        assert!(validate_name(Some("Bed 4")).is_ok());
        assert!(validate_name(Some(" \t")).is_err());
    }

    #[test]
    fn test_raw_line() {
        let stub = csv_line(RAW_VALUES.iter().map(SensorValue::stub));
        assert_eq!(stub, "75,98.5,72,0.15,-0.08,9.81");

        let empty = models::LatestReadings::default();
        let line = csv_line(RAW_VALUES.iter().map(|v| v.read(&empty).unwrap_or(NO_DATA)));
        assert_eq!(line, "0,0,0,0,0,0");
    }
}
