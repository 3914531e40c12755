//! Hourly collection: read current counters off every enabled meter and
//! append them to the meter's current monthly detail store.

use crate::client::{ChannelReading, MeterClient, MeterClientError};
use crate::config::Config;
use crate::db::models::{NewMeasurement, PowerMeter};
use crate::db::stores::{self, StoreError};
use crate::registry::{DeviceRegistry, RegistryError};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use core::fmt;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum CollectError {
    TimeZone(String),
    Registry(RegistryError),
    Meter(MeterClientError),
    Store(StoreError),
}

impl Display for CollectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::TimeZone(tz) => write!(f, "unknown time zone: {}", tz),
            CollectError::Registry(e) => write!(f, "registry error: {}", e),
            CollectError::Meter(e) => write!(f, "meter read failed: {}", e),
            CollectError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl Error for CollectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectError::Registry(e) => Some(e),
            CollectError::Meter(e) => Some(e),
            CollectError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Collect one reading per active channel from every enabled meter. Returns
/// `false` only when the registry cannot be read; per-meter failures are
/// logged and do not affect the other meters.
pub fn hourly_process(cfg: &Config, now: DateTime<Utc>) -> bool {
    let mut registry = match DeviceRegistry::open(&cfg.config_db_path) {
        Ok(r) => r,
        Err(e) => {
            error!("Hourly collection aborted: {}", e);
            return false;
        }
    };
    let meters = match registry.enabled_meters() {
        Ok(m) => m,
        Err(e) => {
            error!("Hourly collection aborted: {}", e);
            return false;
        }
    };

    let client = MeterClient::new();
    for meter in &meters {
        match collect_meter(cfg, &mut registry, &client, meter, now) {
            Ok(rows) => info!("{}: stored {} reading(s)", meter.ip_address, rows),
            Err(e) => error!("{}: collection failed: {}", meter.ip_address, e),
        }
    }
    true
}

fn collect_meter(
    cfg: &Config,
    registry: &mut DeviceRegistry,
    client: &MeterClient,
    meter: &PowerMeter,
    now: DateTime<Utc>,
) -> Result<usize, CollectError> {
    let channels = registry.active_channels(meter.id).map_err(CollectError::Registry)?;
    if channels.is_empty() {
        return Ok(0);
    }
    let active: Vec<i32> = channels.iter().map(|c| c.channel).collect();

    let tz: Tz = meter
        .time_zone
        .parse()
        .map_err(|_| CollectError::TimeZone(meter.time_zone.clone()))?;
    let readings = client
        .read_channels(&meter.ip_address, meter.port as u16)
        .map_err(CollectError::Meter)?;
    let rows = rows_from_readings(&readings, &active, now);

    // Detail stores are named by the meter's local month.
    let local = now.with_timezone(&tz);
    let dir = stores::meter_data_dir(&cfg.data_root, &meter.ip_address);
    let path = dir.join(stores::monthly_store_name(local.year(), local.month()));
    let mut store = stores::open_store(&path, true).map_err(CollectError::Store)?;
    stores::insert_measurements(&mut store, &rows).map_err(CollectError::Store)
}

/// Keep only the channels enabled in the registry, stamped with the
/// collection time.
fn rows_from_readings(readings: &[ChannelReading], active: &[i32], now: DateTime<Utc>) -> Vec<NewMeasurement> {
    readings
        .iter()
        .filter(|r| active.contains(&r.channel))
        .map(|r| NewMeasurement::new(r.channel, r.value, now))
        .collect()
}
