use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration: scheduler lane caps, oracle backend settings and
/// the loader state machine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoneConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub state_machine: StateMachineConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Maximum number of commands in flight per priority lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_high")]
    pub max_high: u32,

    #[serde(default = "default_max_standard")]
    pub max_standard: u32,

    /// Must be at least one: overflowing commands always land here.
    #[serde(default = "default_max_low")]
    pub max_low: u32,
}

fn default_max_high() -> u32 {
    1
}

fn default_max_standard() -> u32 {
    4
}

fn default_max_low() -> u32 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_high: default_max_high(),
            max_standard: default_max_standard(),
            max_low: default_max_low(),
        }
    }
}

/// Settings of the command execution backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Worker threads of the threaded backend.
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Tick of the thread that fires expired sleep commands.
    #[serde(default = "default_sleeping_time_resolution_ms")]
    pub sleeping_time_resolution_ms: u64,

    /// Base directory for relative file paths.
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,

    /// Byte budget of the parsed-DICOM cache (0 = disabled).
    #[serde(default)]
    pub dicom_cache_size: u64,

    #[serde(default)]
    pub orthanc: OrthancConfig,
}

fn default_threads() -> u32 {
    4
}

fn default_sleeping_time_resolution_ms() -> u64 {
    50
}

fn default_root_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            sleeping_time_resolution_ms: default_sleeping_time_resolution_ms(),
            root_directory: default_root_directory(),
            dicom_cache_size: 0,
            orthanc: OrthancConfig::default(),
        }
    }
}

/// Connection to the Orthanc server used by REST API commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthancConfig {
    #[serde(default = "default_orthanc_url")]
    pub url: String,

    /// Empty means no authentication.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Client-wide timeout in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_orthanc_url() -> String {
    "http://localhost:8042/".into()
}

impl Default for OrthancConfig {
    fn default() -> Self {
        Self {
            url: default_orthanc_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 0,
        }
    }
}

impl OrthancConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Commands a single loader keeps in flight.
    #[serde(default = "default_simultaneous_downloads")]
    pub simultaneous_downloads: u32,
}

fn default_simultaneous_downloads() -> u32 {
    4
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            simultaneous_downloads: default_simultaneous_downloads(),
        }
    }
}
