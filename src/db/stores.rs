//! Layout and access for the per-device SQLite measurement stores.
//!
//! Every power meter owns a directory under the configured data root, named
//! by its network address. Fine-grained readings land in one store per local
//! month (`YYYY-MM-monthly.sqlite`); the yearly rollup writes one store per
//! year (`YYYY-yearly.sqlite`). Both contain a single `measurements` table.

use crate::db::models::{Measurement, NewMeasurement};
use crate::schema;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use core::fmt;
use diesel::prelude::*;
use diesel::SqliteConnection;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const MONTHLY_STORE_SUFFIX: &str = "-monthly.sqlite";
pub const YEARLY_STORE_SUFFIX: &str = "-yearly.sqlite";

const MEASUREMENTS_DDL: &str = "CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    channel INTEGER NOT NULL,
    measured_value DOUBLE NOT NULL,
    recorded_time BIGINT NOT NULL
)";

#[derive(Debug)]
pub enum StoreError {
    /// The store file does not exist and creation was not requested.
    NotFound(PathBuf),
    CreateDir(PathBuf, std::io::Error),
    Connect(PathBuf, diesel::ConnectionError),
    Sql(diesel::result::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(p) => write!(f, "store file not found: {}", p.display()),
            StoreError::CreateDir(p, e) => write!(f, "creating {} failed: {}", p.display(), e),
            StoreError::Connect(p, e) => write!(f, "opening {} failed: {}", p.display(), e),
            StoreError::Sql(e) => write!(f, "sql error: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::CreateDir(_, e) => Some(e),
            StoreError::Connect(_, e) => Some(e),
            StoreError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Sql(value)
    }
}

/// A meter's data directory, keyed by its network address.
pub fn meter_data_dir(data_root: &Path, address: &str) -> PathBuf {
    data_root.join(address)
}

pub fn monthly_store_name(year: i32, month: u32) -> String {
    format!("{:04}-{:02}{}", year, month, MONTHLY_STORE_SUFFIX)
}

pub fn yearly_store_name(year: i32) -> String {
    format!("{:04}{}", year, YEARLY_STORE_SUFFIX)
}

/// Open a measurement store.
///
/// With `create` set, a missing file (and its parent directories) is created
/// and the schema applied. Without it, a missing file is an error: readers
/// must never leave empty stores behind.
pub fn open_store(path: &Path, create: bool) -> Result<SqliteConnection, StoreError> {
    if !path.exists() {
        if !create {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir(parent.to_path_buf(), e))?;
        }
    }

    let mut conn = SqliteConnection::establish(&path.to_string_lossy())
        .map_err(|e| StoreError::Connect(path.to_path_buf(), e))?;
    if create {
        diesel::sql_query(MEASUREMENTS_DDL).execute(&mut conn)?;
    }
    Ok(conn)
}

pub fn insert_measurements(conn: &mut SqliteConnection, rows: &[NewMeasurement]) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }

    use schema::measurements::dsl as M;

    diesel::insert_into(M::measurements)
        .values(rows)
        .execute(conn)
        .map_err(StoreError::Sql)
}

/// Merge raw rows across the monthly stores overlapping `[from, to)`,
/// ordered by `recorded_time` within each month. Store files are named by
/// the device's local month, so months are enumerated in `tz`. Absent months
/// are skipped silently; rows outside the window are filtered out.
pub fn load_measurements_between(
    dir: &Path,
    tz: Tz,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Measurement>, StoreError> {
    use schema::measurements::dsl as M;

    let (from_ts, to_ts) = (from.timestamp(), to.timestamp());
    let mut rows = Vec::new();
    for (year, month) in months_spanned(tz, from, to) {
        let path = dir.join(monthly_store_name(year, month));
        if !path.exists() {
            continue;
        }
        let mut conn = open_store(&path, false)?;
        let mut chunk = M::measurements
            .filter(M::recorded_time.ge(from_ts).and(M::recorded_time.lt(to_ts)))
            .order(M::recorded_time.asc())
            .select(Measurement::as_select())
            .load::<Measurement>(&mut conn)
            .map_err(StoreError::Sql)?;
        rows.append(&mut chunk);
    }
    Ok(rows)
}

/// Local-time (year, month) pairs whose store files may hold rows of the
/// half-open window `[from, to)`.
fn months_spanned(tz: Tz, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<(i32, u32)> {
    if to <= from {
        return Vec::new();
    }

    let start = from.with_timezone(&tz);
    let end = (to - Duration::seconds(1)).with_timezone(&tz);
    let mut months = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());
    while (year, month) <= (end.year(), end.month()) {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

/// Time resolution for reducing raw readings into rollup records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
}

impl Granularity {
    fn bucket(self, local: DateTime<Tz>) -> (i32, u32, u32, u32) {
        match self {
            Granularity::Hourly => (local.year(), local.month(), local.day(), local.hour()),
            Granularity::Daily => (local.year(), local.month(), local.day(), 0),
            Granularity::Monthly => (local.year(), local.month(), 0, 0),
        }
    }
}

/// Reduce raw rows to one record per (channel, local-time bucket).
///
/// Meters report cumulative counters, so the closing reading of a bucket
/// carries the period's total; its value and timestamp are kept as the
/// rollup record.
pub fn summarize(rows: &[Measurement], tz: Tz, granularity: Granularity) -> Vec<NewMeasurement> {
    let mut last: BTreeMap<(i32, (i32, u32, u32, u32)), &Measurement> = BTreeMap::new();
    for row in rows {
        let Some(ts) = Utc.timestamp_opt(row.recorded_time, 0).single() else {
            continue;
        };
        let bucket = granularity.bucket(ts.with_timezone(&tz));
        let entry = last.entry((row.channel, bucket)).or_insert(row);
        if row.recorded_time >= entry.recorded_time {
            *entry = row;
        }
    }

    last.into_values()
        .map(|m| NewMeasurement {
            channel: m.channel,
            measured_value: m.measured_value,
            recorded_time: m.recorded_time,
        })
        .collect()
}
