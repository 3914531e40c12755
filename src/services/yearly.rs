//! Yearly rollup pipeline.
//!
//! For every enabled meter: aggregate the elapsed year's monthly detail
//! stores into a yearly store, bundle the monthly files into a zip archive,
//! then prune them when deletion is configured. Devices are processed one at
//! a time and fail independently; only an unreadable registry aborts a run.

use crate::config::Config;
use crate::db::models::PowerMeter;
use crate::db::stores::{self, Granularity, StoreError};
use crate::registry::{DeviceRegistry, RegistryError};
use crate::services::archive::{self, ArchiveError};
use crate::services::retention;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use core::fmt;
use diesel::prelude::*;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

// Overlapping scheduler triggers skip the run instead of queueing behind it.
static RUN_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug)]
pub enum AggregationError {
    /// The registry carries a time zone name the tz database does not know.
    TimeZone(String),
    /// Midnight January 1 does not resolve to an instant in this zone.
    Window { time_zone: String, year: i32 },
    Store(StoreError),
    Sql(diesel::result::Error),
}

impl Display for AggregationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::TimeZone(tz) => write!(f, "unknown time zone: {}", tz),
            AggregationError::Window { time_zone, year } => {
                write!(f, "no valid midnight for January 1 {} in {}", year, time_zone)
            }
            AggregationError::Store(e) => write!(f, "store error: {}", e),
            AggregationError::Sql(e) => write!(f, "sql error: {}", e),
        }
    }
}

impl Error for AggregationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AggregationError::Store(e) => Some(e),
            AggregationError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for AggregationError {
    fn from(value: StoreError) -> Self {
        AggregationError::Store(value)
    }
}

impl From<diesel::result::Error> for AggregationError {
    fn from(value: diesel::result::Error) -> Self {
        AggregationError::Sql(value)
    }
}

/// Failure of one device's run, tagged with the stage that raised it.
#[derive(Debug)]
pub enum DeviceError {
    Aggregation(AggregationError),
    Archive(ArchiveError),
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Aggregation(e) => write!(f, "aggregation failed: {}", e),
            DeviceError::Archive(e) => write!(f, "archiving failed: {}", e),
        }
    }
}

impl Error for DeviceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeviceError::Aggregation(e) => Some(e),
            DeviceError::Archive(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub struct DeviceStats {
    pub rows_written: usize,
    pub files_archived: usize,
    pub files_deleted: usize,
}

#[derive(Debug)]
pub struct DeviceOutcome {
    pub ip_address: String,
    pub result: Result<DeviceStats, DeviceError>,
}

#[derive(Debug)]
pub struct RunReport {
    pub target_year: i32,
    pub devices: Vec<DeviceOutcome>,
}

impl RunReport {
    pub fn failed_devices(&self) -> usize {
        self.devices.iter().filter(|d| d.result.is_err()).count()
    }
}

/// Scheduler-facing entry point. Returns `false` only when the registry
/// cannot be read or a run is already in flight; per-device failures are
/// logged and collected in the run summary without affecting the result.
pub fn yearly_process(cfg: &Config, now: DateTime<Utc>) -> bool {
    let Ok(_guard) = RUN_LOCK.try_lock() else {
        warn!("Yearly pipeline already running; skipping this trigger");
        return false;
    };

    info!("Yearly aggregation started");
    match run_yearly(cfg, now) {
        Ok(report) => {
            info!(
                "Yearly aggregation complete for {}: {} device(s), {} failed",
                report.target_year,
                report.devices.len(),
                report.failed_devices()
            );
            true
        }
        Err(e) => {
            error!("Yearly aggregation aborted: {}", e);
            false
        }
    }
}

/// Run the pipeline against every enabled meter for the elapsed year. Only a
/// registry failure propagates; everything below the device boundary is
/// captured in the report.
pub fn run_yearly(cfg: &Config, now: DateTime<Utc>) -> Result<RunReport, RegistryError> {
    let target_year = now.year() - 1;
    let mut registry = DeviceRegistry::open(&cfg.config_db_path)?;
    let meters = registry.enabled_meters()?;
    info!("Aggregating year {} for {} meter(s)", target_year, meters.len());

    let mut devices = Vec::with_capacity(meters.len());
    for meter in &meters {
        let result = process_meter(cfg, meter, target_year);
        match &result {
            Ok(stats) => info!(
                "{}: {} row(s) aggregated, {} file(s) archived, {} file(s) removed",
                meter.ip_address, stats.rows_written, stats.files_archived, stats.files_deleted
            ),
            Err(e) => error!("{}: year {} failed: {}", meter.ip_address, target_year, e),
        }
        devices.push(DeviceOutcome {
            ip_address: meter.ip_address.clone(),
            result,
        });
    }

    Ok(RunReport { target_year, devices })
}

/// Aggregate, archive, clean up, in that order. Cleanup only runs after a
/// successful archive and never fails the device.
fn process_meter(cfg: &Config, meter: &PowerMeter, target_year: i32) -> Result<DeviceStats, DeviceError> {
    let rows_written = aggregate_year(cfg, meter, target_year).map_err(DeviceError::Aggregation)?;

    let dir = stores::meter_data_dir(&cfg.data_root, &meter.ip_address);
    let archived = archive::archive_year(&dir, &cfg.archive_relative_path, target_year).map_err(DeviceError::Archive)?;

    let files_deleted = retention::cleanup_year(&dir, target_year, cfg.delete_after_aggregation);

    Ok(DeviceStats {
        rows_written,
        files_archived: archived.files.len(),
        files_deleted,
    })
}

fn parse_time_zone(time_zone: &str) -> Result<Tz, AggregationError> {
    time_zone
        .parse()
        .map_err(|_| AggregationError::TimeZone(time_zone.to_string()))
}

/// The aggregation window for one device: `[Jan 1 year, Jan 1 year+1)`
/// resolved in the device's own time zone, as UTC instants.
pub fn aggregation_window(time_zone: &str, year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>), AggregationError> {
    window_in_tz(parse_time_zone(time_zone)?, time_zone, year)
}

fn window_in_tz(tz: Tz, time_zone: &str, year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>), AggregationError> {
    let from = local_midnight(tz, year).ok_or(AggregationError::Window {
        time_zone: time_zone.to_string(),
        year,
    })?;
    let to = local_midnight(tz, year + 1).ok_or(AggregationError::Window {
        time_zone: time_zone.to_string(),
        year: year + 1,
    })?;
    Ok((from, to))
}

fn local_midnight(tz: Tz, year: i32) -> Option<DateTime<Utc>> {
    // Some zones have shifted clocks exactly at midnight; an ambiguous pair
    // resolves to the earlier instant.
    tz.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read the year's raw rows, reduce them to monthly records, and write those
/// into the device's yearly store inside a single transaction. Returns the
/// number of rows written. The store connection closes on drop on both the
/// success and the failure path.
pub fn aggregate_year(cfg: &Config, meter: &PowerMeter, target_year: i32) -> Result<usize, AggregationError> {
    let tz = parse_time_zone(&meter.time_zone)?;
    let (from, to) = window_in_tz(tz, &meter.time_zone, target_year)?;

    let dir = stores::meter_data_dir(&cfg.data_root, &meter.ip_address);

    // Open (or create) the yearly store before reading anything so an
    // unopenable store fails the device up front.
    let mut yearly = stores::open_store(&dir.join(stores::yearly_store_name(target_year)), true)?;

    let raw = stores::load_measurements_between(&dir, tz, from, to)?;
    let records = stores::summarize(&raw, tz, Granularity::Monthly);
    info!(
        "{}: {} raw row(s) -> {} monthly record(s) for {}",
        meter.ip_address,
        raw.len(),
        records.len(),
        target_year
    );

    let written = yearly.transaction::<usize, diesel::result::Error, _>(|conn| {
        use crate::schema::measurements::dsl as M;

        let mut written = 0;
        for record in &records {
            written += diesel::insert_into(M::measurements).values(record).execute(conn)?;
        }
        Ok(written)
    })?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Measurement, NewMeasurement, NewPowerMeter};
    use crate::MIGRATIONS;
    use diesel::SqliteConnection;
    use diesel_migrations::MigrationHarness;
    use std::path::Path;

    fn test_config(root: &Path, delete_after_aggregation: bool) -> Config {
        Config {
            config_db_path: root.join("config.sqlite"),
            data_root: root.join("data"),
            archive_relative_path: "archive".to_string(),
            delete_after_aggregation,
            yearly_cron: crate::config::DEFAULT_YEARLY_CRONTAB.to_string(),
            hourly_cron: crate::config::DEFAULT_HOURLY_CRONTAB.to_string(),
            seed_demo_data: false,
        }
    }

    fn test_meter(address: &str, time_zone: &str) -> PowerMeter {
        PowerMeter {
            id: 1,
            asset_name: "hall-a".to_string(),
            ip_address: address.to_string(),
            port: 80,
            time_zone: time_zone.to_string(),
            enabled: true,
        }
    }

    fn seed_registry(cfg: &Config, meters: &[NewPowerMeter]) {
        use crate::schema::power_meter::dsl as P;

        let mut conn =
            SqliteConnection::establish(&cfg.config_db_path.to_string_lossy()).expect("create registry");
        conn.run_pending_migrations(MIGRATIONS).expect("migrations");
        diesel::insert_into(P::power_meter)
            .values(meters)
            .execute(&mut conn)
            .expect("insert meters");
    }

    /// Two readings per channel per month; the later one carries
    /// `month * 100 + channel` so closing values are recognisable.
    fn write_monthly_stores(cfg: &Config, address: &str, year: i32, months: &[u32], channels: &[i32]) {
        let dir = stores::meter_data_dir(&cfg.data_root, address);
        for &month in months {
            let path = dir.join(stores::monthly_store_name(year, month));
            let mut conn = stores::open_store(&path, true).expect("create monthly store");
            let mut rows = Vec::new();
            for &channel in channels {
                let early = Utc.with_ymd_and_hms(year, month, 3, 6, 0, 0).unwrap();
                let late = Utc.with_ymd_and_hms(year, month, 27, 18, 0, 0).unwrap();
                rows.push(NewMeasurement::new(channel, 1.0, early));
                rows.push(NewMeasurement::new(channel, (month * 100) as f64 + channel as f64, late));
            }
            stores::insert_measurements(&mut conn, &rows).expect("insert raw rows");
        }
    }

    fn yearly_rows(cfg: &Config, address: &str, year: i32) -> Vec<Measurement> {
        use crate::schema::measurements::dsl as M;

        let dir = stores::meter_data_dir(&cfg.data_root, address);
        let mut conn = stores::open_store(&dir.join(stores::yearly_store_name(year)), false).expect("open yearly");
        M::measurements
            .order((M::channel.asc(), M::recorded_time.asc()))
            .select(Measurement::as_select())
            .load(&mut conn)
            .expect("load yearly rows")
    }

    #[test]
    fn window_matches_the_device_zone() {
        let (from, to) = aggregation_window("UTC", 2023).expect("window");
        assert_eq!(from, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        // Budapest midnight is an hour earlier as an absolute instant.
        let (bp_from, bp_to) = aggregation_window("Europe/Budapest", 2023).expect("window");
        assert_eq!(bp_from, Utc.with_ymd_and_hms(2022, 12, 31, 23, 0, 0).unwrap());
        assert_eq!(bp_to, Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap());
        assert_ne!((from, to), (bp_from, bp_to));
    }

    #[test]
    fn unknown_time_zone_is_rejected() {
        match aggregation_window("Mars/Olympus_Mons", 2023) {
            Err(AggregationError::TimeZone(tz)) => assert_eq!(tz, "Mars/Olympus_Mons"),
            other => panic!("expected TimeZone error, got {:?}", other),
        }
    }

    #[test]
    fn aggregates_a_full_year_into_monthly_records() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        let meter = test_meter("10.0.0.21", "UTC");
        let months: Vec<u32> = (1..=12).collect();
        write_monthly_stores(&cfg, &meter.ip_address, 2023, &months, &[1, 2]);

        let written = aggregate_year(&cfg, &meter, 2023).expect("aggregate");
        assert_eq!(written, 24, "12 months x 2 channels");

        let rows = yearly_rows(&cfg, &meter.ip_address, 2023);
        assert_eq!(rows.len(), 24);
        // closing reading of March, channel 2
        assert!(rows.iter().any(|r| r.channel == 2 && r.measured_value == 302.0));
        // the early readings never make it into the rollup
        assert!(rows.iter().all(|r| r.measured_value != 1.0));
    }

    #[test]
    fn missing_months_shrink_the_rollup() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        let meter = test_meter("10.0.0.22", "UTC");
        let months: Vec<u32> = (1..=12).filter(|m| *m != 3).collect();
        write_monthly_stores(&cfg, &meter.ip_address, 2023, &months, &[1]);

        let written = aggregate_year(&cfg, &meter, 2023).expect("aggregate");
        assert_eq!(written, 11);
    }

    #[test]
    fn empty_year_writes_no_rows_but_creates_the_store() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        let meter = test_meter("10.0.0.23", "UTC");

        let written = aggregate_year(&cfg, &meter, 2023).expect("aggregate");
        assert_eq!(written, 0);
        assert!(
            stores::meter_data_dir(&cfg.data_root, &meter.ip_address)
                .join(stores::yearly_store_name(2023))
                .exists()
        );
    }

    #[test]
    fn full_pipeline_aggregates_archives_and_prunes() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), true);
        seed_registry(
            &cfg,
            &[NewPowerMeter {
                asset_name: "hall-a".to_string(),
                ip_address: "10.0.0.31".to_string(),
                port: 80,
                time_zone: "UTC".to_string(),
                enabled: true,
            }],
        );
        let months: Vec<u32> = (1..=12).collect();
        write_monthly_stores(&cfg, "10.0.0.31", 2023, &months, &[1, 2]);

        let now = Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap();
        let report = run_yearly(&cfg, now).expect("run");
        assert_eq!(report.target_year, 2023);
        assert_eq!(report.devices.len(), 1);

        let stats = report.devices[0].result.as_ref().expect("device succeeded");
        assert_eq!(stats.rows_written, 24);
        assert_eq!(stats.files_archived, 12);
        assert_eq!(stats.files_deleted, 12);

        let dir = stores::meter_data_dir(&cfg.data_root, "10.0.0.31");
        assert!(dir.join("archive").join("2023.zip").exists());
        for month in 1..=12 {
            assert!(!dir.join(stores::monthly_store_name(2023, month)).exists());
        }
        // the rollup store survives retention
        assert!(dir.join(stores::yearly_store_name(2023)).exists());
    }

    #[test]
    fn device_failures_do_not_stop_the_batch() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        seed_registry(
            &cfg,
            &[
                NewPowerMeter {
                    asset_name: "broken".to_string(),
                    ip_address: "10.0.0.41".to_string(),
                    port: 80,
                    time_zone: "Not/A_Zone".to_string(),
                    enabled: true,
                },
                NewPowerMeter {
                    asset_name: "good".to_string(),
                    ip_address: "10.0.0.42".to_string(),
                    port: 80,
                    time_zone: "UTC".to_string(),
                    enabled: true,
                },
            ],
        );
        write_monthly_stores(&cfg, "10.0.0.42", 2023, &[5], &[1]);

        let now = Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap();
        let report = run_yearly(&cfg, now).expect("run");
        assert_eq!(report.devices.len(), 2);
        assert_eq!(report.failed_devices(), 1);
        assert!(report.devices[0].result.is_err());
        assert!(report.devices[1].result.is_ok());
    }

    #[test]
    fn boolean_contract_tracks_registry_readability_only() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap();

        // no registry file at all: the run fails
        assert!(!yearly_process(&cfg, now));

        // a readable registry with a failing device: the run still succeeds
        seed_registry(
            &cfg,
            &[NewPowerMeter {
                asset_name: "broken".to_string(),
                ip_address: "10.0.0.51".to_string(),
                port: 80,
                time_zone: "Not/A_Zone".to_string(),
                enabled: true,
            }],
        );
        assert!(yearly_process(&cfg, now));
    }

    #[test]
    fn rerun_with_deletion_disabled_rebuilds_the_same_archive() {
        let root = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(root.path(), false);
        let meter = test_meter("10.0.0.61", "UTC");
        write_monthly_stores(&cfg, &meter.ip_address, 2023, &[1, 2, 3], &[1]);

        let dir = stores::meter_data_dir(&cfg.data_root, &meter.ip_address);
        aggregate_year(&cfg, &meter, 2023).expect("aggregate");
        let first = archive::archive_year(&dir, &cfg.archive_relative_path, 2023).expect("first archive");
        let second = archive::archive_year(&dir, &cfg.archive_relative_path, 2023).expect("second archive");
        assert_eq!(first.files, second.files);

        // monthly sources are still on disk because deletion was disabled
        assert_eq!(retention::cleanup_year(&dir, 2023, cfg.delete_after_aggregation), 0);
        for month in [1, 2, 3] {
            assert!(dir.join(stores::monthly_store_name(2023, month)).exists());
        }
    }
}
