//! Post-archive pruning of monthly detail stores.

use crate::db::stores;
use log::{info, warn};
use std::fs;
use std::path::Path;

/// Delete the twelve monthly stores of `year` under `dir`. Best effort: an
/// absent file is skipped, a file that fails to delete is logged and the
/// remaining months are still attempted. Returns the number of files
/// removed.
///
/// Callers must only invoke this after the year's archive has been written;
/// the sequencing lives in the orchestrator, not here.
pub fn cleanup_year(dir: &Path, year: i32, delete_enabled: bool) -> usize {
    if !delete_enabled {
        return 0;
    }

    let mut deleted = 0;
    for month in 1..=12 {
        let path = dir.join(stores::monthly_store_name(year, month));
        if !path.exists() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => warn!("failed to delete {}: {}", path.display(), e),
        }
    }

    if deleted > 0 {
        info!("Removed {} monthly store(s) for {} under {}", deleted, year, dir.display());
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn monthly_path(dir: &Path, year: i32, month: u32) -> PathBuf {
        dir.join(stores::monthly_store_name(year, month))
    }

    #[test]
    fn disabled_flag_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(monthly_path(dir.path(), 2023, 1), "jan").expect("fixture");

        assert_eq!(cleanup_year(dir.path(), 2023, false), 0);
        assert!(monthly_path(dir.path(), 2023, 1).exists());
    }

    #[test]
    fn deletes_only_the_target_year() {
        let dir = tempfile::tempdir().expect("tempdir");
        for month in 1..=12 {
            fs::write(monthly_path(dir.path(), 2023, month), "x").expect("fixture");
        }
        fs::write(monthly_path(dir.path(), 2024, 1), "keep").expect("fixture");
        fs::write(dir.path().join("2023-yearly.sqlite"), "keep").expect("fixture");

        assert_eq!(cleanup_year(dir.path(), 2023, true), 12);
        assert!(monthly_path(dir.path(), 2024, 1).exists());
        assert!(dir.path().join("2023-yearly.sqlite").exists());
        for month in 1..=12 {
            assert!(!monthly_path(dir.path(), 2023, month).exists());
        }
    }

    #[test]
    fn missing_months_are_skipped_and_rerun_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        for month in [2, 9] {
            fs::write(monthly_path(dir.path(), 2023, month), "x").expect("fixture");
        }

        assert_eq!(cleanup_year(dir.path(), 2023, true), 2);
        assert_eq!(cleanup_year(dir.path(), 2023, true), 0);
    }
}
