//! Read-only view over the power meter configuration registry.
//!
//! The registry is a standalone SQLite database listing the fleet's meters
//! and their measurement channels. The pipeline opens it fresh once per run
//! and never writes through this module.

use crate::db::models::{Channel, PowerMeter};
use crate::schema;
use core::fmt;
use diesel::prelude::*;
use diesel::SqliteConnection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum RegistryError {
    /// The registry file does not exist; opening must not create one.
    Missing(PathBuf),
    Connect(PathBuf, diesel::ConnectionError),
    Query(diesel::result::Error),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Missing(p) => write!(f, "registry file not found: {}", p.display()),
            RegistryError::Connect(p, e) => write!(f, "opening registry {} failed: {}", p.display(), e),
            RegistryError::Query(e) => write!(f, "registry query failed: {}", e),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegistryError::Connect(_, e) => Some(e),
            RegistryError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for RegistryError {
    fn from(value: diesel::result::Error) -> Self {
        RegistryError::Query(value)
    }
}

pub struct DeviceRegistry {
    conn: SqliteConnection,
}

impl DeviceRegistry {
    /// Open the registry for one run. The file must already exist; opening
    /// never creates an empty registry.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if !path.is_file() {
            return Err(RegistryError::Missing(path.to_path_buf()));
        }
        let conn = SqliteConnection::establish(&path.to_string_lossy())
            .map_err(|e| RegistryError::Connect(path.to_path_buf(), e))?;
        Ok(DeviceRegistry { conn })
    }

    /// Every meter flagged enabled, in id order.
    pub fn enabled_meters(&mut self) -> Result<Vec<PowerMeter>, RegistryError> {
        use schema::power_meter::dsl as P;

        P::power_meter
            .filter(P::enabled.eq(true))
            .order(P::id.asc())
            .select(PowerMeter::as_select())
            .load(&mut self.conn)
            .map_err(RegistryError::Query)
    }

    /// The enabled measurement channels of one meter, in channel order.
    pub fn active_channels(&mut self, meter_id: i32) -> Result<Vec<Channel>, RegistryError> {
        use schema::channels::dsl as C;

        C::channels
            .filter(C::power_meter_id.eq(meter_id).and(C::enabled.eq(true)))
            .order(C::channel.asc())
            .select(Channel::as_select())
            .load(&mut self.conn)
            .map_err(RegistryError::Query)
    }
}
