//! Serial Bindings Library
//!
//! Cross-platform asynchronous serial port bindings.
//!
//! # Modules
//!
//! - `native`: per-platform handle layers (POSIX, Windows) and a virtual-port mock
//! - `binding`: the uniform open/close/read/write/set/get/drain/flush/update contract
//! - `stream`: push-style streaming with backpressure over a binding
//! - `options`: open options, control-line flags and modem status
//! - `config`: configuration management with TOML support
//! - `logging`: `tracing` subscriber setup
//! - `error`: binding error type

pub mod binding;
pub mod config;
pub mod error;
pub mod logging;
pub mod native;
pub mod options;
pub mod stream;

pub use binding::{Binding, BindingFuture, DisconnectSignal, ReadFuture, ReadOutcome};
pub use error::{BindingError, BindingResult};
pub use native::{DeviceError, HandleLayer, MockLayer, MockPort, PortInfo, PortType};
pub use options::{DataBits, OpenOptions, Parity, PortStatus, SetOptions, StopBits};
pub use stream::{Flow, Halt, PushSink, PushSource, PushSourceBuilder, ReadCapability, StreamSlot};

#[cfg(any(unix, windows))]
pub use binding::NativeBinding;

#[cfg(any(unix, windows))]
pub use native::NativeLayer;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
