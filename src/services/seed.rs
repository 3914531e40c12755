//! Synthetic measurement history for development setups without real meters.
//!
//! Registers a demo meter when the registry is empty, then fills last year's
//! monthly stores with a rising cumulative counter per active channel.

use crate::config::Config;
use crate::db::models::{NewChannel, NewMeasurement, NewPowerMeter};
use crate::db::stores::{self, StoreError};
use crate::registry::DeviceRegistry;
use crate::schema;
use chrono::{Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const DEMO_ADDRESS: &str = "127.0.0.1";
const DEMO_CHANNELS: [i32; 3] = [1, 2, 3];
const STEP_HOURS: i64 = 1;

pub fn run(cfg: &Config) -> Result<(), String> {
    ensure_demo_meter(cfg)?;

    let mut registry = DeviceRegistry::open(&cfg.config_db_path).map_err(|e| format!("seed: {}", e))?;
    let meters = registry.enabled_meters().map_err(|e| format!("seed: {}", e))?;
    let year = Utc::now().year() - 1;

    for meter in &meters {
        let channels = registry.active_channels(meter.id).map_err(|e| format!("seed: {}", e))?;
        if channels.is_empty() {
            continue;
        }
        let numbers: Vec<i32> = channels.iter().map(|c| c.channel).collect();
        let tz: Tz = meter
            .time_zone
            .parse()
            .map_err(|_| format!("seed: unknown time zone {}", meter.time_zone))?;
        seed_meter(cfg, &meter.ip_address, &numbers, tz, year)
            .map_err(|e| format!("seed {}: {}", meter.ip_address, e))?;
    }
    Ok(())
}

/// Insert a demo meter with three channels if the registry has no meters at
/// all. An already populated registry is left untouched.
fn ensure_demo_meter(cfg: &Config) -> Result<(), String> {
    use schema::channels::dsl as C;
    use schema::power_meter::dsl as P;

    let mut conn = SqliteConnection::establish(&cfg.config_db_path.to_string_lossy())
        .map_err(|e| format!("seed: opening registry failed: {}", e))?;

    let meters: i64 = P::power_meter
        .count()
        .get_result(&mut conn)
        .map_err(|e| format!("seed: {}", e))?;
    if meters > 0 {
        return Ok(());
    }

    info!("Seed: registering demo meter {}", DEMO_ADDRESS);
    diesel::insert_into(P::power_meter)
        .values(&NewPowerMeter {
            asset_name: "demo-meter".to_string(),
            ip_address: DEMO_ADDRESS.to_string(),
            port: 8080,
            time_zone: "Europe/Budapest".to_string(),
            enabled: true,
        })
        .execute(&mut conn)
        .map_err(|e| format!("seed: {}", e))?;

    let meter_id: i32 = P::power_meter
        .filter(P::ip_address.eq(DEMO_ADDRESS))
        .select(P::id)
        .first(&mut conn)
        .map_err(|e| format!("seed: {}", e))?;
    let rows: Vec<NewChannel> = DEMO_CHANNELS
        .iter()
        .map(|ch| NewChannel {
            power_meter_id: meter_id,
            channel: *ch,
            enabled: true,
        })
        .collect();
    diesel::insert_into(C::channels)
        .values(&rows)
        .execute(&mut conn)
        .map_err(|e| format!("seed: {}", e))?;
    Ok(())
}

fn seed_meter(cfg: &Config, address: &str, channels: &[i32], tz: Tz, year: i32) -> Result<(), StoreError> {
    let mut rng = SmallRng::seed_from_u64(0x5EED_0000 ^ address.len() as u64);
    let dir = stores::meter_data_dir(&cfg.data_root, address);
    let mut counters: Vec<f64> = channels
        .iter()
        .map(|_| rng.random_range(10_000.0..50_000.0))
        .collect();

    info!("Seed: generating synthetic {} history for {}", year, address);
    for month in 1..=12u32 {
        let Some(start) = tz.with_ymd_and_hms(year, month, 1, 0, 0, 0).earliest() else {
            continue;
        };
        let next = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let Some(end) = tz.with_ymd_and_hms(next.0, next.1, 1, 0, 0, 0).earliest() else {
            continue;
        };

        let path = dir.join(stores::monthly_store_name(year, month));
        let mut store = stores::open_store(&path, true)?;

        let mut rows = Vec::new();
        let mut ts = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        while ts < end {
            for (slot, channel) in channels.iter().enumerate() {
                counters[slot] += rng.random_range(0.05..2.5);
                rows.push(NewMeasurement::new(*channel, counters[slot], ts));
            }
            ts += Duration::hours(STEP_HOURS);
        }
        stores::insert_measurements(&mut store, &rows)?;
    }
    Ok(())
}
