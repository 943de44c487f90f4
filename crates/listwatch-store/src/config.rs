use std::path::PathBuf;

use listwatch_core::AppError;

pub const DEFAULT_DATA_DIR: &str = "data/cl";

/// Where category documents live.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `LISTWATCH_DATA_DIR` (optional, defaults to `data/cl`)
    pub fn from_env() -> Result<Self, AppError> {
        match std::env::var("LISTWATCH_DATA_DIR") {
            Err(_) => Ok(Self::default()),
            Ok(raw) if raw.trim().is_empty() => Err(AppError::ConfigError(
                "LISTWATCH_DATA_DIR must not be empty".into(),
            )),
            Ok(raw) => Ok(Self::new(raw)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}
