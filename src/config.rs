//! Application configuration.
//!
//! Loaded once from the environment (and a `.env` file, if present) and
//! passed to whatever wires the client together.

use std::env;
use std::path::PathBuf;

use tracing::Level;

use crate::session::{FileStorage, SESSION_KEY};

pub const API_BASE_URL_VAR: &str = "THERAPIST_API_BASE_URL";
pub const SESSION_FILE_VAR: &str = "THERAPIST_SESSION_FILE";
pub const INPUT_DEVICE_VAR: &str = "THERAPIST_INPUT_DEVICE";
pub const OUTPUT_DEVICE_VAR: &str = "THERAPIST_OUTPUT_DEVICE";
pub const LOG_LEVEL_VAR: &str = "RUST_LOG";

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs against canned offline replies.
    pub api_base_url: Option<String>,
    pub session_file: PathBuf,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `THERAPIST_API_BASE_URL`: (Optional) Backend base URL. Unset means offline replies.
    // *   `THERAPIST_SESSION_FILE`: (Optional) Where the session id is kept.
    // *   `THERAPIST_INPUT_DEVICE` / `THERAPIST_OUTPUT_DEVICE`: (Optional) Device names, host default otherwise.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary source of variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_base_url = match non_empty(API_BASE_URL_VAR) {
            Some(url) => {
                reqwest::Url::parse(&url)
                    .map_err(|e| ConfigError::InvalidValue(API_BASE_URL_VAR, format!("{url}: {e}")))?;
                Some(url.trim_end_matches('/').to_string())
            }
            None => None,
        };

        let session_file = non_empty(SESSION_FILE_VAR)
            .map(PathBuf::from)
            .or_else(FileStorage::default_path)
            .unwrap_or_else(|| PathBuf::from(SESSION_KEY));

        let log_level_str = non_empty(LOG_LEVEL_VAR).unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue(LOG_LEVEL_VAR, log_level_str))?;

        Ok(Self {
            api_base_url,
            session_file,
            input_device: non_empty(INPUT_DEVICE_VAR),
            output_device: non_empty(OUTPUT_DEVICE_VAR),
            log_level,
        })
    }

    pub fn is_offline(&self) -> bool {
        self.api_base_url.is_none()
    }
}
