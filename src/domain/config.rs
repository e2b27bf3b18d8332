//! Configuration profiles
//!
//! A Configuration holds everything needed to talk to one radio: the serial
//! port settings, the transaction engine's timing knobs and the channel
//! programming options. Profiles are plain JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CatError, CatResult};

/// Upper bound on `EngineConfig::retries`
pub const MAX_RETRIES: u32 = 10;

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: Option<String>,
    /// Serial baud rate (must match the radio's CAT RATE menu)
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 38400,
        }
    }
}

/// Transaction engine tuning. These depend on the radio and the USB-serial
/// adapter, so none of them are hard-coded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long to wait for an answer before re-sending (per attempt)
    pub timeout_ms: u64,
    /// Re-sends after the first attempt times out
    pub retries: u32,
    /// Minimum gap between commands (FT-991A firmware requirement)
    pub command_delay_ms: u64,
    /// How long to listen for an error after an execute command
    pub execute_drain_ms: u64,
    /// Frame body the radio sends to reject a command
    pub reject_pattern: String,
    /// Longest partial frame buffered before it is declared malformed
    pub max_frame_len: usize,
    /// Drop our own frames if the adapter echoes them back
    pub local_echo: bool,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn execute_drain(&self) -> Duration {
        Duration::from_millis(self.execute_drain_ms)
    }

    pub fn validate(&self) -> CatResult<()> {
        if self.timeout_ms == 0 {
            return Err(CatError::Config("timeout_ms must be greater than zero".into()));
        }
        if self.retries > MAX_RETRIES {
            return Err(CatError::Config(format!(
                "retries {} is more than the maximum of {MAX_RETRIES}",
                self.retries
            )));
        }
        if self.reject_pattern.is_empty() || self.reject_pattern.contains(';') {
            return Err(CatError::Config(format!(
                "reject_pattern '{}' must be non-empty and must not contain ';'",
                self.reject_pattern
            )));
        }
        if self.max_frame_len < 32 {
            return Err(CatError::Config(format!(
                "max_frame_len {} is too small for the longest CAT answer",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            retries: 2,
            command_delay_ms: 50,
            execute_drain_ms: 50,
            reject_pattern: "?".to_string(),
            max_frame_len: 64,
            local_echo: false,
        }
    }
}

/// Channel plan application options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Put VFO-A frequency and mode back after staging channels through it
    pub restore_vfo: bool,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self { restore_vfo: true }
    }
}

/// A saved configuration profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Profile name (e.g., "FT-991A Home", "FT-991A Portable")
    pub name: String,
    pub serial: SerialSettings,
    pub engine: EngineConfig,
    pub program: ProgramConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            serial: SerialSettings::default(),
            engine: EngineConfig::default(),
            program: ProgramConfig::default(),
        }
    }
}

impl Configuration {
    pub fn from_json_str(json: &str) -> CatResult<Self> {
        let config: Configuration = serde_json::from_str(json)
            .map_err(|e| CatError::Config(format!("Failed to parse configuration: {e}")))?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> CatResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CatError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: &Path) -> CatResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CatError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            CatError::Config(format!("Failed to write config '{}': {e}", path.display()))
        })
    }
}
