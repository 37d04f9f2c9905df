//! Records exchanged with a binding: open configuration, control lines and
//! modem status.
//!
//! Both option records deserialize from JSON objects using the familiar
//! camelCase keys (`baudRate`, `dataBits`, `rtscts`, ...). Unknown keys are
//! ignored; anything that is not an object is rejected as an invalid argument.

use crate::error::BindingError;
use serde::{Deserialize, Serialize};

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(format!("unsupported data bits: {other}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("unsupported stop bits: {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Configuration applied when a port is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    /// Baud rate (bits per second). Must be non-zero.
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Hardware (RTS/CTS) flow control.
    #[serde(alias = "rtscts")]
    pub rts_cts: bool,

    /// Software flow control on output.
    pub xon: bool,

    /// Software flow control on input.
    pub xoff: bool,

    /// Request exclusive access to the device.
    pub lock: bool,

    /// Drop modem control lines when the port is closed.
    pub hupcl: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            rts_cts: false,
            xon: false,
            xoff: false,
            lock: true,
            hupcl: true,
        }
    }
}

impl OpenOptions {
    /// Default 8N1 options at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Parse options from a JSON configuration record.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, BindingError> {
        if !value.is_object() {
            return Err(BindingError::invalid_argument("\"options\" is not an object"));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| BindingError::invalid_argument(format!("\"options\" is invalid: {e}")))
    }

    /// Flow control mode implied by the `rts_cts` / `xon` / `xoff` flags.
    ///
    /// Hardware flow control wins when both kinds are requested.
    pub fn flow_control(&self) -> serialport::FlowControl {
        if self.rts_cts {
            serialport::FlowControl::Hardware
        } else if self.xon || self.xoff {
            serialport::FlowControl::Software
        } else {
            serialport::FlowControl::None
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BindingError> {
        validate_baud_rate(self.baud_rate)
    }
}

pub(crate) fn validate_baud_rate(baud_rate: u32) -> Result<(), BindingError> {
    if baud_rate == 0 {
        return Err(BindingError::invalid_argument(
            "\"baudRate\" must be a positive integer",
        ));
    }
    Ok(())
}

/// Control-line flags written by `set`.
///
/// `cts` and `dsr` are inputs on most hardware; platforms that cannot drive
/// them ignore the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    /// Assert a break condition.
    pub brk: bool,
    /// Request To Send.
    pub rts: bool,
    /// Clear To Send.
    pub cts: bool,
    /// Data Terminal Ready.
    pub dtr: bool,
    /// Data Set Ready.
    pub dsr: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            brk: false,
            rts: true,
            cts: false,
            dtr: true,
            dsr: false,
        }
    }
}

impl SetOptions {
    /// Parse flags from a JSON configuration record.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, BindingError> {
        if !value.is_object() {
            return Err(BindingError::invalid_argument("\"options\" is not an object"));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| BindingError::invalid_argument(format!("\"options\" is invalid: {e}")))
    }
}

/// Modem status lines reported by `get`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    /// Clear To Send.
    pub cts: bool,
    /// Data Set Ready.
    pub dsr: bool,
    /// Data Carrier Detect.
    pub dcd: bool,
}
