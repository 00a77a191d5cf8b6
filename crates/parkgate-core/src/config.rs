//! Gate configuration
//!
//! One serde snapshot holds every parameter the entry lane needs. Components
//! take it (or their section) at construction and only see a new one through
//! an explicit `reload`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::anpr::{ALARM_PORT, ALARM_TYPE_PLATE, PROBE_TIMEOUT_MS};
use crate::orchestrator::TicketNumbering;
use crate::protocol::{
    ConnectionConfig, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, INBOUND_QUEUE_CAPACITY,
    STATUS_INTERVAL_MS,
};
use crate::store::{ParameterStore, StoreError};
use crate::ticket::DEFAULT_ACCESS_LABEL;

/// File name used inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not find a configuration directory")]
    NoConfigDir,
}

/// Complete configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub serial: SerialSettings,
    pub anpr: AnprSettings,
    pub printer: PrinterSettings,
    pub relay: RelaySettings,
    pub ticket: TicketSettings,
}

/// Controller serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub status_interval_ms: u64,
    /// Wait after opening the port before the first STATUS
    pub startup_delay_ms: u64,
    pub queue_capacity: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: "COM7".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            status_interval_ms: STATUS_INTERVAL_MS,
            startup_delay_ms: 2000,
            queue_capacity: INBOUND_QUEUE_CAPACITY,
        }
    }
}

impl From<&SerialSettings> for ConnectionConfig {
    fn from(settings: &SerialSettings) -> Self {
        ConnectionConfig {
            port_name: settings.port_name.clone(),
            baud_rate: settings.baud_rate,
            timeout_ms: settings.timeout_ms,
            status_interval_ms: settings.status_interval_ms,
            startup_delay_ms: settings.startup_delay_ms,
            queue_capacity: settings.queue_capacity,
        }
    }
}

/// Plate recognition appliance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnprSettings {
    /// Plate reading enabled
    pub enabled: bool,
    /// Appliance address (host name or IP, no port)
    pub host: String,
    pub alarm_port: u16,
    pub alarm_type: u32,
    pub camera_mask: String,
    /// Camera id the store files entry plates under
    pub entry_camera_id: String,
    pub exit_camera_id: String,
    /// Expected appliance processing time before the store is queried
    pub plate_read_delay_ms: u64,
    pub probe_timeout_ms: u64,
    /// Message shown to the cashier while a plate is read
    pub cashier_message: String,
}

impl Default for AnprSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            alarm_port: ALARM_PORT,
            alarm_type: ALARM_TYPE_PLATE,
            camera_mask: "1".to_string(),
            entry_camera_id: "1".to_string(),
            exit_camera_id: "2".to_string(),
            plate_read_delay_ms: 3000,
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            cashier_message: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    /// Name of the ticket printer as known to the host
    pub name: String,
}

/// Barrier relay board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Pause after writing before the port is closed
    pub settle_ms: u64,
    pub entry_command: String,
    pub exit_command: String,
    /// Pause between ticket issue and barrier pulse
    pub ticket_to_barrier_delay_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            port_name: "COM1".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 500,
            settle_ms: 100,
            entry_command: String::new(),
            exit_command: String::new(),
            ticket_to_barrier_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketSettings {
    pub access_label: String,
    pub numbering: TicketNumbering,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            access_label: DEFAULT_ACCESS_LABEL.to_string(),
            numbering: TicketNumbering::default(),
        }
    }
}

impl GateConfig {
    /// Default config directory (`<config dir>/parkgate`)
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("parkgate"))
    }

    /// Default config file path
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::default_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save as pretty JSON, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Controller session settings derived from the serial section
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.serial)
    }
}

/// Parameter store backed by a JSON file, re-read on every load
#[derive(Debug, Clone)]
pub struct FileParameterStore {
    path: PathBuf,
}

impl FileParameterStore {
    /// Store backed by the JSON file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default config path
    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::new(GateConfig::default_path()?))
    }

    /// File the configuration is read from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ParameterStore for FileParameterStore {
    async fn load(&self) -> Result<GateConfig, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || GateConfig::load_or_default(&path))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
