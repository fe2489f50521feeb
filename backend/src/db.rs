use anyhow::{anyhow, Context, Result};
use common::req::{BulkSensorData, SensorFamily};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::ingest;
use crate::schema::*;
use crate::utils::ms_since_epoch;

pub mod models;

use models::*;

// busy_timeout first, switching to WAL needs the write lock
const PRAGMAS: &str = "
    PRAGMA busy_timeout = 5000;
    PRAGMA foreign_keys = ON;
    PRAGMA journal_mode = WAL;
";

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Rows newest first; equal timestamps fall back to insertion order.
macro_rules! recent {
    ($name:ident, $table:ident, $row:ty) => {
        pub fn $name(&mut self, device_id: Option<&str>, limit: i64) -> QueryResult<Vec<$row>> {
            let mut query: $table::BoxedQuery<'_, Sqlite> = $table::table.into_boxed();
            if let Some(device_id) = device_id {
                query = query.filter($table::device_id.eq(device_id));
            }
            query
                .order(($table::timestamp.desc(), $table::id.desc()))
                .limit(limit)
                .load::<$row>(&mut self.conn)
        }
    };
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub device: Device,
    pub created: bool,
    pub families: Vec<SensorFamily>,
    pub timestamp: i64,
}

/// Inserts the device unless it exists, then refreshes `last_seen`.
///
/// The insert is a single `ON CONFLICT DO NOTHING` statement so two first
/// uploads of the same id can never produce two rows. Call inside a
/// transaction.
pub fn upsert_device(conn: &mut SqliteConnection, defaults: &NewDevice) -> QueryResult<(Device, bool)> {
    let inserted = diesel::insert_into(devices::table)
        .values(defaults)
        .on_conflict(devices::device_id)
        .do_nothing()
        .execute(conn)?;

    diesel::update(devices::table.find(defaults.device_id.as_str()))
        .set(devices::last_seen.eq(defaults.last_seen))
        .execute(conn)?;

    let device = devices::table
        .find(defaults.device_id.as_str())
        .first::<Device>(conn)?;

    Ok((device, inserted == 1))
}

pub struct Db {
    conn: SqliteConnection,
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(database_url)
            .with_context(|| format!("failed to open database {database_url}"))?;
        conn.batch_execute(PRAGMAS)
            .context("failed to configure database connection")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("failed to run database migrations: {e}"))?;
        for version in applied {
            log::info!("applied migration {version}");
        }

        Ok(Self { conn })
    }

    pub fn ping(&mut self) -> QueryResult<()> {
        diesel::sql_query("SELECT 1").execute(&mut self.conn)?;
        Ok(())
    }

    /// Upserts the device and appends every qualifying reading in one
    /// transaction. Nothing is written if any statement fails.
    pub fn ingest(&mut self, data: &BulkSensorData) -> QueryResult<IngestOutcome> {
        self.conn.immediate_transaction(|conn| {
            let now = ms_since_epoch();
            let (device, created) =
                upsert_device(conn, &NewDevice::with_defaults(&data.device_id, now))?;

            let batch = ingest::plan(data, now);
            if let Some(row) = &batch.ecg {
                diesel::insert_into(ecg_readings::table)
                    .values(row)
                    .execute(conn)?;
            }
            if let Some(row) = &batch.pulse_oximeter {
                diesel::insert_into(pulse_oximeter_readings::table)
                    .values(row)
                    .execute(conn)?;
            }
            if let Some(row) = &batch.max30102 {
                diesel::insert_into(max30102_readings::table)
                    .values(row)
                    .execute(conn)?;
            }
            if let Some(row) = &batch.accelerometer {
                diesel::insert_into(accelerometer_readings::table)
                    .values(row)
                    .execute(conn)?;
            }
            if let Some(row) = &batch.device_status {
                diesel::insert_into(device_status::table)
                    .values(row)
                    .execute(conn)?;
            }

            Ok(IngestOutcome {
                device,
                created,
                families: batch.families(),
                timestamp: now,
            })
        })
    }

    // ===============================================
    // devices
    // ===============================================

    #[cfg(test)]
    pub fn upsert_device(&mut self, defaults: &NewDevice) -> QueryResult<(Device, bool)> {
        self.conn
            .immediate_transaction(|conn| upsert_device(conn, defaults))
    }

    /// Registers a device explicitly, `None` if the id is taken.
    pub fn create_device(&mut self, device: &NewDevice) -> QueryResult<Option<Device>> {
        let inserted = diesel::insert_into(devices::table)
            .values(device)
            .on_conflict(devices::device_id)
            .do_nothing()
            .execute(&mut self.conn)?;

        if inserted == 0 {
            return Ok(None);
        }
        self.find_device(&device.device_id)
    }

    pub fn find_device(&mut self, device_id: &str) -> QueryResult<Option<Device>> {
        devices::table
            .find(device_id)
            .first::<Device>(&mut self.conn)
            .optional()
    }

    pub fn list_devices(&mut self, active_only: bool) -> QueryResult<Vec<Device>> {
        let mut query: devices::BoxedQuery<'_, Sqlite> = devices::table.into_boxed();
        if active_only {
            query = query.filter(devices::is_active.eq(true));
        }
        query
            .order(devices::device_id.asc())
            .load::<Device>(&mut self.conn)
    }

    pub fn update_device(
        &mut self,
        device_id: &str,
        changes: &DeviceChanges,
    ) -> QueryResult<Option<Device>> {
        if changes.is_empty() {
            return self.find_device(device_id);
        }

        let updated = diesel::update(devices::table.find(device_id))
            .set(changes)
            .execute(&mut self.conn)?;
        if updated == 0 {
            return Ok(None);
        }
        self.find_device(device_id)
    }

    /// Deletes the device; its readings go with it through the foreign keys.
    pub fn delete_device(&mut self, device_id: &str) -> QueryResult<bool> {
        let deleted = diesel::delete(devices::table.find(device_id)).execute(&mut self.conn)?;
        Ok(deleted > 0)
    }

    // ===============================================
    // readings
    // ===============================================

    recent!(recent_ecg, ecg_readings, EcgReading);
    recent!(recent_pulse_oximeter, pulse_oximeter_readings, PulseOximeterReading);
    recent!(recent_max30102, max30102_readings, Max30102Reading);
    recent!(recent_accelerometer, accelerometer_readings, AccelerometerReading);
    recent!(recent_device_status, device_status, DeviceStatus);

    pub fn latest_ecg(&mut self, device_id: Option<&str>) -> QueryResult<Option<EcgReading>> {
        Ok(self.recent_ecg(device_id, 1)?.pop())
    }

    pub fn latest_pulse_oximeter(
        &mut self,
        device_id: Option<&str>,
    ) -> QueryResult<Option<PulseOximeterReading>> {
        Ok(self.recent_pulse_oximeter(device_id, 1)?.pop())
    }

    pub fn latest_max30102(
        &mut self,
        device_id: Option<&str>,
    ) -> QueryResult<Option<Max30102Reading>> {
        Ok(self.recent_max30102(device_id, 1)?.pop())
    }

    pub fn latest_accelerometer(
        &mut self,
        device_id: Option<&str>,
    ) -> QueryResult<Option<AccelerometerReading>> {
        Ok(self.recent_accelerometer(device_id, 1)?.pop())
    }

    pub fn latest_device_status(
        &mut self,
        device_id: Option<&str>,
    ) -> QueryResult<Option<DeviceStatus>> {
        Ok(self.recent_device_status(device_id, 1)?.pop())
    }

    pub fn family_readings(
        &mut self,
        family: SensorFamily,
        device_id: Option<&str>,
        limit: i64,
    ) -> QueryResult<FamilyReadings> {
        Ok(match family {
            SensorFamily::Ecg => FamilyReadings::Ecg(self.recent_ecg(device_id, limit)?),
            SensorFamily::PulseOximeter => {
                FamilyReadings::PulseOximeter(self.recent_pulse_oximeter(device_id, limit)?)
            }
            SensorFamily::Max30102 => {
                FamilyReadings::Max30102(self.recent_max30102(device_id, limit)?)
            }
            SensorFamily::Accelerometer => {
                FamilyReadings::Accelerometer(self.recent_accelerometer(device_id, limit)?)
            }
            SensorFamily::DeviceStatus => {
                FamilyReadings::DeviceStatus(self.recent_device_status(device_id, limit)?)
            }
        })
    }

    pub fn latest_readings(&mut self, device_id: Option<&str>) -> QueryResult<LatestReadings> {
        Ok(LatestReadings {
            ecg: self.latest_ecg(device_id)?,
            pulse_oximeter: self.latest_pulse_oximeter(device_id)?,
            max30102: self.latest_max30102(device_id)?,
            accelerometer: self.latest_accelerometer(device_id)?,
            device_status: self.latest_device_status(device_id)?,
        })
    }

    pub fn recent_readings(
        &mut self,
        device_id: Option<&str>,
        limit: i64,
    ) -> QueryResult<RecentReadings> {
        Ok(RecentReadings {
            ecg_readings: self.recent_ecg(device_id, limit)?,
            pulse_oximeter_readings: self.recent_pulse_oximeter(device_id, limit)?,
            max30102_readings: self.recent_max30102(device_id, limit)?,
            accelerometer_readings: self.recent_accelerometer(device_id, limit)?,
            device_status: self.recent_device_status(device_id, limit)?,
        })
    }

    pub fn statistics(&mut self) -> QueryResult<Statistics> {
        let conn = &mut self.conn;
        let mut stats = Statistics {
            total_devices: devices::table.count().get_result(conn)?,
            ecg_readings: ecg_readings::table.count().get_result(conn)?,
            pulse_oximeter_readings: pulse_oximeter_readings::table.count().get_result(conn)?,
            max30102_readings: max30102_readings::table.count().get_result(conn)?,
            accelerometer_readings: accelerometer_readings::table.count().get_result(conn)?,
            device_status_reports: device_status::table.count().get_result(conn)?,
            ..Default::default()
        };
        stats.total_readings = stats.ecg_readings
            + stats.pulse_oximeter_readings
            + stats.max30102_readings
            + stats.accelerometer_readings
            + stats.device_status_reports;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn memory_db() -> Db {
        Db::connect(":memory:").unwrap()
    }

    fn payload(device_id: &str) -> BulkSensorData {
        BulkSensorData::with_device_id(device_id)
    }

    #[test]
    fn test_first_ingest_creates_device() {
        let mut db = memory_db();

        let first = db.ingest(&payload("D1")).unwrap();
        assert!(first.created);
        assert_eq!(first.device.device_id, "D1");
        assert_eq!(first.device.name, "IoT Device D1");
        assert_eq!(first.device.device_type, DEFAULT_DEVICE_TYPE);
        assert!(first.device.is_active);
        assert!(first.families.is_empty());

        let second = db.ingest(&payload("D1")).unwrap();
        assert!(!second.created);
        assert_eq!(second.device.created_at, first.device.created_at);
        assert!(second.device.last_seen >= first.device.last_seen);

        assert_eq!(db.list_devices(false).unwrap().len(), 1);
        assert_eq!(db.statistics().unwrap().total_readings, 0);
    }

    #[test]
    fn test_upsert_refreshes_last_seen_only() {
        let mut db = memory_db();
        let (device, created) = db.upsert_device(&NewDevice::with_defaults("D1", 1_000)).unwrap();
        assert!(created);
        assert_eq!((device.created_at, device.last_seen), (1_000, 1_000));

        let mut later = NewDevice::with_defaults("D1", 5_000);
        later.name = "ignored".to_owned();
        let (device, created) = db.upsert_device(&later).unwrap();
        assert!(!created);
        assert_eq!(device.name, "IoT Device D1");
        assert_eq!((device.created_at, device.last_seen), (1_000, 5_000));
    }

    #[test]
    fn test_ingest_writes_each_family() {
        let mut db = memory_db();
        let data = BulkSensorData {
            ecg_heart_rate: Some(75.5),
            spo2: Some(98.2),
            red_value: Some(12345),
            x_axis: Some(0.12),
            y_axis: Some(-0.05),
            z_axis: Some(9.81),
            battery_level: Some(87.5),
            ..payload("D1")
        };

        let outcome = db.ingest(&data).unwrap();
        assert_eq!(outcome.families, SensorFamily::ALL.to_vec());

        let latest = db.latest_readings(Some("D1")).unwrap();
        assert_eq!(latest.ecg.unwrap().heart_rate, 75.5);
        assert_eq!(latest.pulse_oximeter.unwrap().spo2, 98.2);
        assert_eq!(latest.max30102.unwrap().red_value, 12345);
        let accel = latest.accelerometer.unwrap();
        assert!((accel.magnitude - 9.8108).abs() < 1e-4);
        assert_eq!(accel.timestamp, outcome.timestamp);
        assert_eq!(latest.device_status.unwrap().battery_level, Some(87.5));

        let stats = db.statistics().unwrap();
        assert_eq!(stats.total_devices, 1);
        assert_eq!(stats.total_readings, 5);
    }

    #[test]
    fn test_missing_family_is_none() {
        let mut db = memory_db();
        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(75.5),
            ..payload("D1")
        })
        .unwrap();

        assert_eq!(db.latest_ecg(Some("D1")).unwrap().unwrap().heart_rate, 75.5);
        assert_eq!(db.latest_pulse_oximeter(Some("D1")).unwrap(), None);
        assert_eq!(db.latest_ecg(Some("other")).unwrap(), None);
    }

    #[test]
    fn test_latest_follows_insertion_order() {
        let mut db = memory_db();
        for rate in [60.0, 61.0, 62.0] {
            db.ingest(&BulkSensorData {
                ecg_heart_rate: Some(rate),
                ..payload("D1")
            })
            .unwrap();
        }
        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(90.0),
            ..payload("D2")
        })
        .unwrap();

        assert_eq!(db.latest_ecg(Some("D1")).unwrap().unwrap().heart_rate, 62.0);
        assert_eq!(db.latest_ecg(None).unwrap().unwrap().heart_rate, 90.0);

        let recent = db.recent_ecg(Some("D1"), 2).unwrap();
        let rates: Vec<f64> = recent.iter().map(|r| r.heart_rate).collect();
        assert_eq!(rates, vec![62.0, 61.0]);
    }

    #[test]
    fn test_latest_prefers_later_timestamp() {
        let mut db = memory_db();
        db.upsert_device(&NewDevice::with_defaults("D1", 0)).unwrap();

        // rows inserted out of timestamp order
        for (timestamp, rate) in [(2_000, 80.0), (1_000, 70.0)] {
            diesel::insert_into(ecg_readings::table)
                .values(&NewEcgReading {
                    device_id: "D1".to_owned(),
                    timestamp,
                    heart_rate: rate,
                    ecg_value: 0.0,
                    signal_quality: "good".to_owned(),
                })
                .execute(&mut db.conn)
                .unwrap();
        }

        assert_eq!(db.latest_ecg(Some("D1")).unwrap().unwrap().heart_rate, 80.0);
    }

    #[test]
    fn test_create_device_conflict() {
        let mut db = memory_db();
        let device = NewDevice::with_defaults("D1", 1);
        assert!(db.create_device(&device).unwrap().is_some());
        assert!(db.create_device(&device).unwrap().is_none());
    }

    #[test]
    fn test_list_active_devices() {
        let mut db = memory_db();
        for id in ["c", "a", "b"] {
            db.ingest(&payload(id)).unwrap();
        }
        db.update_device(
            "b",
            &DeviceChanges {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let all: Vec<String> = db
            .list_devices(false)
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let active: Vec<String> = db
            .list_devices(true)
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(active, vec!["a", "c"]);
    }

    #[test]
    fn test_update_device() {
        let mut db = memory_db();
        let created = db.ingest(&payload("D1")).unwrap().device;

        let changes = DeviceChanges {
            name: Some("Ward 3 monitor".to_owned()),
            ..Default::default()
        };
        let updated = db.update_device("D1", &changes).unwrap().unwrap();
        assert_eq!(updated.name, "Ward 3 monitor");
        assert_eq!(updated.device_type, created.device_type);
        assert_eq!(updated.last_seen, created.last_seen);

        assert_eq!(db.update_device("D2", &changes).unwrap(), None);
        assert_eq!(
            db.update_device("D1", &DeviceChanges::default()).unwrap(),
            Some(updated)
        );
    }

    #[test]
    fn test_delete_cascades_to_readings() {
        let mut db = memory_db();
        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(75.0),
            battery_level: Some(50.0),
            ..payload("D1")
        })
        .unwrap();
        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(80.0),
            ..payload("D2")
        })
        .unwrap();

        assert!(db.delete_device("D1").unwrap());
        assert!(!db.delete_device("D1").unwrap());

        let stats = db.statistics().unwrap();
        assert_eq!(stats.total_devices, 1);
        assert_eq!(stats.ecg_readings, 1);
        assert_eq!(stats.device_status_reports, 0);
    }

    #[test]
    fn test_failed_ingest_rolls_back() {
        let mut db = memory_db();
        db.conn
            .batch_execute("DROP TABLE device_status;")
            .unwrap();

        let result = db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(75.0),
            battery_level: Some(50.0),
            ..payload("D1")
        });
        assert!(result.is_err());

        assert_eq!(db.find_device("D1").unwrap(), None);
        assert_eq!(db.latest_ecg(None).unwrap(), None);
    }

    #[test]
    fn test_reading_ids_past_i32() {
        let mut db = memory_db();
        db.ingest(&payload("D1")).unwrap();
        db.conn
            .batch_execute(
                "INSERT INTO ecg_readings (id, device_id, timestamp, heart_rate, ecg_value, signal_quality)
                 VALUES (3000000000, 'D1', 1, 70.0, 0.0, 'good');",
            )
            .unwrap();
        assert_eq!(db.latest_ecg(Some("D1")).unwrap().unwrap().id, 3_000_000_000);

        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(72.0),
            ..payload("D1")
        })
        .unwrap();
        let latest = db.latest_ecg(Some("D1")).unwrap().unwrap();
        assert_eq!((latest.id, latest.heart_rate), (3_000_000_001, 72.0));
    }

    #[test]
    fn test_migrations_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.db");
        let url = path.to_str().unwrap().to_owned();

        let mut db = Db::connect(&url).unwrap();
        db.ingest(&BulkSensorData {
            ecg_heart_rate: Some(70.0),
            ..payload("D1")
        })
        .unwrap();
        drop(db);

        let mut db = Db::connect(&url).unwrap();
        assert!(!db.conn.has_pending_migration(MIGRATIONS).unwrap());
        assert_eq!(db.conn.applied_migrations().unwrap().len(), 1);
        assert_eq!(db.statistics().unwrap().ecg_readings, 1);
    }

    #[test]
    fn test_concurrent_first_ingest_creates_one_device() {
        const WRITERS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.db");
        let url = path.to_str().unwrap().to_owned();
        // schema and journal mode are set up before the race starts
        Db::connect(&url).unwrap();

        let barrier = Arc::new(Barrier::new(WRITERS));
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let url = url.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let mut db = Db::connect(&url).unwrap();
                    barrier.wait();
                    db.ingest(&BulkSensorData {
                        ecg_heart_rate: Some(70.0),
                        ..payload("RACE")
                    })
                    .unwrap()
                    .created
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);

        let mut db = Db::connect(&url).unwrap();
        let stats = db.statistics().unwrap();
        assert_eq!(stats.total_devices, 1);
        assert_eq!(stats.ecg_readings, WRITERS as i64);
    }
}
