//! Binding-level error type.
//!
//! Every binding operation has two failure channels. Malformed calls fail
//! with [`BindingError::InvalidArgument`] straight from the method call,
//! before any future exists. Runtime conditions (`PortNotOpen`,
//! `AlreadyOpen`, device failures) resolve through the returned future.

use crate::native::DeviceError;
use thiserror::Error;

/// Convenient Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

/// Errors surfaced by [`Binding`](crate::Binding) and
/// [`PushSource`](crate::PushSource).
#[derive(Debug, Error)]
pub enum BindingError {
    /// The call itself was malformed. Never produced by the handle layer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires an open port and none is open.
    #[error("Port is not open")]
    PortNotOpen,

    /// `open` was called on a binding that already holds a handle.
    #[error("Port is already open")]
    AlreadyOpen,

    /// The OS reported a failure; carried verbatim from the handle layer.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl BindingError {
    /// Create an InvalidArgument error from a message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether the error means the device went away underneath the binding.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Device(err) if err.is_disconnect())
    }
}

impl From<std::io::Error> for BindingError {
    fn from(err: std::io::Error) -> Self {
        Self::Device(DeviceError::Io(err))
    }
}
