//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_BINDINGS";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-bindings.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_BINDINGS_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using the standard resolution order, then apply
    /// environment overrides and validate.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;
        debug!(path = ?config_path, "configuration loaded");

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides that fail to parse are ignored.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(err) = apply_env_overrides(&mut config) {
            debug!(error = %err, "ignoring environment override");
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform config directory for this crate.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-bindings").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::io("read", path, e))?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::io("create directory for", path, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::io("write", path, e))
}

fn env_var(key: &str) -> (String, Option<String>) {
    let name = format!("{ENV_PREFIX}_{key}");
    let value = std::env::var(&name).ok();
    (name, value)
}

fn parse_env<T: FromStr>(key: &str, message: &'static str) -> ConfigResult<Option<T>> {
    match env_var(key) {
        (_, None) => Ok(None),
        (var, Some(value)) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::EnvVar {
                var,
                value,
                message,
            }),
        },
    }
}

/// Apply `SERIAL_BINDINGS_<SECTION>_<KEY>` overrides to the configuration.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(baud) = parse_env("SERIAL_DEFAULT_BAUD", "expected a baud rate")? {
        config.serial.default_baud = baud;
    }
    if let Some(read_size) = parse_env("STREAM_READ_SIZE", "expected a byte count")? {
        config.stream.read_size = read_size;
    }
    if let Some(interval) = parse_env("STREAM_RETRY_INTERVAL_MS", "expected milliseconds")? {
        config.stream.retry_interval_ms = interval;
    }
    if let (_, Some(level)) = env_var("LOGGING_LEVEL") {
        config.logging.level = level;
    }
    if let (var, Some(value)) = env_var("LOGGING_FORMAT") {
        config.logging.format = match value.to_lowercase().as_str() {
            "json" => super::LogFormat::Json,
            "pretty" => super::LogFormat::Pretty,
            "compact" => super::LogFormat::Compact,
            _ => {
                return Err(ConfigError::EnvVar {
                    var,
                    value,
                    message: "expected json, pretty or compact",
                })
            }
        };
    }

    Ok(())
}
