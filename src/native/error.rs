//! Handle-layer error types.
//!
//! Errors produced by the native layer are OS failures only. They are
//! propagated unchanged: the handle layer never retries.

use thiserror::Error;

/// Result alias used by every [`HandleLayer`](super::HandleLayer) primitive.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while talking to the OS about a serial device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device disappeared while the port was open.
    #[error("Device disconnected: {0}")]
    Disconnected(String),
}

impl DeviceError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Disconnected error from a reason.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected(reason.into())
    }

    /// Capture `errno` / `GetLastError` as an I/O error.
    pub fn last_os_error() -> Self {
        Self::Io(std::io::Error::last_os_error())
    }

    /// Whether this error means the device is gone rather than a transient
    /// I/O failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected(_) => true,
            Self::Io(err) => err.raw_os_error().is_some_and(super::is_disconnect_code),
            Self::Serial(err) => matches!(err.kind(), serialport::ErrorKind::NoDevice),
            Self::NotFound(_) => false,
        }
    }
}

/// Map a `serialport` open failure the way callers expect to see it.
pub(crate) fn open_error(port_name: &str, err: serialport::Error) -> DeviceError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => DeviceError::not_found(port_name),
        serialport::ErrorKind::Io(kind) if kind == std::io::ErrorKind::NotFound => {
            DeviceError::not_found(port_name)
        }
        _ => DeviceError::Serial(err),
    }
}
