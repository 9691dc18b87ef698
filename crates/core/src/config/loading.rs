use std::env;
use std::path::{Path, PathBuf};

use crate::error::StoneError;

use super::types::StoneConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

impl StoneConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, StoneError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoneError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, without any file.
    pub fn from_env() -> Result<Self, StoneError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `STONE_SECTION_KEY` overrides `section.key`.
    /// Examples:
    /// - `STONE_SCHEDULER_MAX_LOW` -> `scheduler.max_low`
    /// - `STONE_ORACLE_THREADS` -> `oracle.threads`
    /// - `STONE_ORTHANC_URL` -> `oracle.orthanc.url`
    /// - `STONE_STATE_MACHINE_SIMULTANEOUS_DOWNLOADS` -> `state_machine.simultaneous_downloads`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("STONE_SCHEDULER_MAX_HIGH") {
            self.scheduler.max_high = v;
        }
        if let Some(v) = env_parsed("STONE_SCHEDULER_MAX_STANDARD") {
            self.scheduler.max_standard = v;
        }
        if let Some(v) = env_parsed("STONE_SCHEDULER_MAX_LOW") {
            self.scheduler.max_low = v;
        }
        if let Some(v) = env_parsed("STONE_ORACLE_THREADS") {
            self.oracle.threads = v;
        }
        if let Some(v) = env_parsed("STONE_ORACLE_SLEEPING_TIME_RESOLUTION_MS") {
            self.oracle.sleeping_time_resolution_ms = v;
        }
        if let Some(v) = env_opt("STONE_ORACLE_ROOT_DIRECTORY") {
            self.oracle.root_directory = PathBuf::from(v);
        }
        if let Some(v) = env_parsed("STONE_ORACLE_DICOM_CACHE_SIZE") {
            self.oracle.dicom_cache_size = v;
        }
        if let Some(v) = env_opt("STONE_ORTHANC_URL") {
            self.oracle.orthanc.url = v;
        }
        if let Some(v) = env_opt("STONE_ORTHANC_USERNAME") {
            self.oracle.orthanc.username = v;
        }
        if let Some(v) = env_opt("STONE_ORTHANC_PASSWORD") {
            self.oracle.orthanc.password = v;
        }
        if let Some(v) = env_parsed("STONE_ORTHANC_TIMEOUT_SECS") {
            self.oracle.orthanc.timeout_secs = v;
        }
        if let Some(v) = env_parsed("STONE_STATE_MACHINE_SIMULTANEOUS_DOWNLOADS") {
            self.state_machine.simultaneous_downloads = v;
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler:     high={}, standard={}, low={}",
            self.scheduler.max_high,
            self.scheduler.max_standard,
            self.scheduler.max_low
        );
        tracing::info!(
            "  oracle:        threads={}, sleep_resolution={}ms, root={}",
            self.oracle.threads,
            self.oracle.sleeping_time_resolution_ms,
            self.oracle.root_directory.display()
        );
        tracing::info!(
            "  orthanc:       url={}, auth={}",
            self.oracle.orthanc.url,
            if self.oracle.orthanc.has_credentials() { "basic" } else { "none" }
        );
        tracing::info!(
            "  state machine: simultaneous_downloads={}",
            self.state_machine.simultaneous_downloads
        );
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "scheduler": {
                "max_high": self.scheduler.max_high,
                "max_standard": self.scheduler.max_standard,
                "max_low": self.scheduler.max_low,
            },
            "oracle": {
                "threads": self.oracle.threads,
                "sleeping_time_resolution_ms": self.oracle.sleeping_time_resolution_ms,
                "root_directory": self.oracle.root_directory,
                "dicom_cache_size": self.oracle.dicom_cache_size,
                "orthanc": {
                    "url": self.oracle.orthanc.url,
                    "authenticated": self.oracle.orthanc.has_credentials(),
                    "timeout_secs": self.oracle.orthanc.timeout_secs,
                },
            },
            "state_machine": {
                "simultaneous_downloads": self.state_machine.simultaneous_downloads,
            },
        })
    }
}
