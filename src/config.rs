//! Minimal runtime configuration helpers.
//! Read once at startup; the rest of the code takes `Config` by reference.

use std::path::PathBuf;

pub const DEFAULT_CONFIG_DB: &str = "config.sqlite";
pub const DEFAULT_DATA_ROOT: &str = "data";
pub const DEFAULT_ARCHIVE_RELATIVE_PATH: &str = "archive";
// `cron` expressions carry a seconds field. The yearly trigger fires at
// 02:00 on January 2nd; the January guard in the scheduler does the rest.
pub const DEFAULT_YEARLY_CRONTAB: &str = "0 0 2 2 1 *";
pub const DEFAULT_HOURLY_CRONTAB: &str = "0 0 * * * *";

#[derive(Debug, Clone)]
pub struct Config {
    /// Location of the read-only device registry store.
    pub config_db_path: PathBuf,
    /// Root directory holding one data directory per meter, named by address.
    pub data_root: PathBuf,
    /// Subdirectory under a meter's data directory receiving yearly archives.
    pub archive_relative_path: String,
    /// Gate for retention deletions after a successful archive.
    pub delete_after_aggregation: bool,
    pub yearly_cron: String,
    pub hourly_cron: String,
    /// Generate synthetic monthly stores at startup (development aid).
    pub seed_demo_data: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config_db_path = std::env::var("CONFIG_DB_FILE_NAME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DB));

        let data_root = std::env::var("DB_FILES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_ROOT));

        let archive_relative_path =
            std::env::var("ARCHIVE_FILE_PATH").unwrap_or_else(|_| DEFAULT_ARCHIVE_RELATIVE_PATH.to_string());
        if archive_relative_path.trim().is_empty() {
            return Err("ARCHIVE_FILE_PATH must not be empty".to_string());
        }

        let delete_after_aggregation = bool_env("DELETE_FILE_AFTER_AGGREGATION", false);

        let yearly_cron = std::env::var("YEARLY_CRONTAB").unwrap_or_else(|_| DEFAULT_YEARLY_CRONTAB.to_string());
        let hourly_cron = std::env::var("HOURLY_CRONTAB").unwrap_or_else(|_| DEFAULT_HOURLY_CRONTAB.to_string());

        let seed_demo_data = bool_env("SEED_DEMO_DATA", false);

        Ok(Config {
            config_db_path,
            data_root,
            archive_relative_path,
            delete_after_aggregation,
            yearly_cron,
            hourly_cron,
            seed_demo_data,
        })
    }
}

fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
        .unwrap_or(default)
}
