//! Configuration loading and directory resolution
//!
//! Resolution priority for every path setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Compiled default (relative to the working directory)

use std::path::PathBuf;

/// Environment variable naming the database directory.
pub const ENV_DATA_DIR: &str = "LOOPFORGE_DATA_DIR";
/// Environment variable naming the file storage root.
pub const ENV_STORAGE: &str = "LOOPFORGE_STORAGE";
/// Set to `1` to skip heavy DSP (stems are copies of the source).
pub const ENV_QUICK_MODE: &str = "LOOPFORGE_QUICK_MODE";
/// Upload size cap in megabytes.
pub const ENV_MAX_UPLOAD_MB: &str = "LOOPFORGE_MAX_UPLOAD_MB";

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Directory holding `loopforge.db`
    pub data_dir: PathBuf,
    /// Root of the file storage tree (uploads/stems/slices/exports/cache)
    pub storage_dir: PathBuf,
    /// Skip heavy DSP: the separation processor copies the source as each stem
    pub quick_mode: bool,
    /// Maximum accepted upload size in megabytes
    pub max_upload_mb: u64,
    /// Number of background workers executing job processors
    pub max_workers: usize,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage_dir: PathBuf::from("./storage"),
            quick_mode: false,
            max_upload_mb: 250,
            max_workers: 2,
        }
    }
}

impl ForgeConfig {
    /// Build a config from the environment, with optional CLI overrides.
    pub fn from_env(
        data_dir_arg: Option<PathBuf>,
        storage_dir_arg: Option<PathBuf>,
        max_workers_arg: Option<usize>,
    ) -> Self {
        let defaults = Self::default();

        let data_dir = data_dir_arg
            .or_else(|| std::env::var(ENV_DATA_DIR).ok().map(PathBuf::from))
            .unwrap_or(defaults.data_dir);

        let storage_dir = storage_dir_arg
            .or_else(|| std::env::var(ENV_STORAGE).ok().map(PathBuf::from))
            .unwrap_or(defaults.storage_dir);

        let quick_mode = std::env::var(ENV_QUICK_MODE)
            .map(|v| v == "1")
            .unwrap_or(false);

        let max_upload_mb = std::env::var(ENV_MAX_UPLOAD_MB)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_upload_mb);

        Self {
            data_dir,
            storage_dir,
            quick_mode,
            max_upload_mb,
            max_workers: max_workers_arg.unwrap_or(defaults.max_workers),
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("loopforge.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.max_upload_mb, 250);
        assert_eq!(config.max_workers, 2);
        assert!(!config.quick_mode);
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = ForgeConfig::from_env(
            Some(PathBuf::from("/tmp/lf-data")),
            Some(PathBuf::from("/tmp/lf-storage")),
            Some(4),
        );
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lf-data"));
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/lf-storage"));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/lf-data/loopforge.db"));
    }
}
