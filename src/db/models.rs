//! Diesel model structs for the registry and the per-device measurement
//! stores.
//!
//! `PowerMeter` and `Channel` rows live in the configuration registry;
//! `Measurement` rows live in the per-device store files, one store per
//! local month plus one per aggregated year.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::power_meter)]
pub struct PowerMeter {
    pub id: i32,
    pub asset_name: String,
    pub ip_address: String,
    pub port: i32,
    pub time_zone: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::power_meter)]
pub struct NewPowerMeter {
    pub asset_name: String,
    pub ip_address: String,
    pub port: i32,
    pub time_zone: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::channels)]
#[diesel(belongs_to(PowerMeter))]
pub struct Channel {
    pub id: i32,
    pub power_meter_id: i32,
    pub channel: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::channels)]
pub struct NewChannel {
    pub power_meter_id: i32,
    pub channel: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::measurements)]
pub struct Measurement {
    pub id: i32,
    pub channel: i32,
    pub measured_value: f64,
    pub recorded_time: i64,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::measurements)]
pub struct NewMeasurement {
    pub channel: i32,
    pub measured_value: f64,
    pub recorded_time: i64,
}

impl NewMeasurement {
    pub fn new(channel: i32, measured_value: f64, recorded_time: DateTime<Utc>) -> Self {
        NewMeasurement {
            channel,
            measured_value,
            recorded_time: recorded_time.timestamp(),
        }
    }
}
