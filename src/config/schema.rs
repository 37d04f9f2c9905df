//! Configuration schema definitions.
//!
//! Every section has defaults, so a file only needs the keys it changes.

use crate::options::{DataBits, OpenOptions, Parity, StopBits};
use crate::stream::{DEFAULT_READ_SIZE, DEFAULT_RETRY_INTERVAL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied when opening ports
    pub serial: SerialConfig,
    /// Push source tuning
    pub stream: StreamConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values no port or stream could run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.default_baud == 0 {
            return Err(ConfigError::invalid(
                "serial.default_baud",
                "must be greater than zero",
            ));
        }
        if self.stream.read_size == 0 {
            return Err(ConfigError::invalid(
                "stream.read_size",
                "must be greater than zero",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate for new connections
    pub default_baud: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Hardware flow control
    pub rts_cts: bool,
    pub xon: bool,
    pub xoff: bool,
    /// Exclusive access
    pub lock: bool,
    /// Drop modem lines on close
    pub hupcl: bool,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let options = OpenOptions::default();
        Self {
            default_baud: options.baud_rate,
            data_bits: options.data_bits,
            stop_bits: options.stop_bits,
            parity: options.parity,
            rts_cts: options.rts_cts,
            xon: options.xon,
            xoff: options.xoff,
            lock: options.lock,
            hupcl: options.hupcl,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Open options built from this section.
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            baud_rate: self.default_baud,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            rts_cts: self.rts_cts,
            xon: self.xon,
            xoff: self.xoff,
            lock: self.lock,
            hupcl: self.hupcl,
        }
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Push source section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes requested per read
    pub read_size: usize,
    /// Delay before retrying a read that returned no data
    pub retry_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_size: DEFAULT_READ_SIZE,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive: "trace", "debug", "info", "warn", "error" or a full
    /// `EnvFilter` expression
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}
