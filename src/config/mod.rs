//! TOML configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the first of these that exists:
//!
//! 1. The path in the `SERIAL_BINDINGS_CONFIG` environment variable
//! 2. `./serial-bindings.toml` (current directory)
//! 3. `config.toml` in the platform config directory
//!    (`~/.config/serial-bindings` on Linux, `%APPDATA%\serial-bindings\config` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Values can be overridden with `SERIAL_BINDINGS_<SECTION>_<KEY>`:
//! - `SERIAL_BINDINGS_SERIAL_DEFAULT_BAUD=115200`
//! - `SERIAL_BINDINGS_STREAM_READ_SIZE=4096`
//! - `SERIAL_BINDINGS_STREAM_RETRY_INTERVAL_MS=25`
//! - `SERIAL_BINDINGS_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```no_run
//! use serial_bindings::config::ConfigLoader;
//!
//! # fn main() -> serial_bindings::config::ConfigResult<()> {
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! let options = config.serial.open_options();
//! println!("default baud: {}", options.baud_rate);
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig, StreamConfig};
