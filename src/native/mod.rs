//! Native port handle layer.
//!
//! [`HandleLayer`] is the capability surface a [`Binding`](crate::Binding)
//! drives: open/close a raw OS handle, move bytes, and poke the control
//! lines. Each platform provides one implementation, selected at compile time
//! through the [`NativeLayer`] alias; [`MockLayer`] serves virtual ports for
//! tests and demos.
//!
//! The layer owns the raw resource and never retries: OS failures come back
//! as [`DeviceError`] exactly as the OS reported them.

pub mod error;
pub mod mock;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

pub use error::{DeviceError, DeviceResult};
pub use mock::{MockFault, MockLayer, MockOp, MockPort, TeardownEvent};

#[cfg(unix)]
pub use unix::UnixLayer;

#[cfg(windows)]
pub use windows::WindowsLayer;

/// The handle layer for the platform this crate was compiled for.
#[cfg(unix)]
pub type NativeLayer = unix::UnixLayer;

/// The handle layer for the platform this crate was compiled for.
#[cfg(windows)]
pub type NativeLayer = windows::WindowsLayer;

#[cfg(unix)]
pub(crate) use unix::is_disconnect_code;

#[cfg(windows)]
pub(crate) use windows::is_disconnect_code;

#[cfg(not(any(unix, windows)))]
pub(crate) fn is_disconnect_code(_code: i32) -> bool {
    false
}

use crate::options::{OpenOptions, PortStatus, SetOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An OS wait object bound to an open handle.
///
/// Implementations release the wait object in `Drop`, so a poller that is
/// dropped without an explicit `close` is still torn down. A binding always
/// releases its poller before it releases the handle the poller watches.
pub trait ReadinessPoller: Send + Sync + 'static {
    /// Release the wait object.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

impl ReadinessPoller for () {}

/// Per-platform primitives operating on an opaque handle.
#[async_trait]
pub trait HandleLayer: Send + Sync + 'static {
    /// Owned OS descriptor for one open port.
    type Handle: Send + Sync + 'static;

    /// Readiness poller attached to a handle for reads and writes.
    type Poller: ReadinessPoller;

    /// Open `path` and apply `options`.
    async fn open(&self, path: &str, options: &OpenOptions) -> DeviceResult<Self::Handle>;

    /// Attach a readiness poller to a freshly opened handle.
    fn poller(&self, handle: &Self::Handle) -> DeviceResult<Self::Poller>;

    /// Release the handle. The poller must already be closed.
    async fn close(&self, handle: Self::Handle) -> DeviceResult<()>;

    /// Read up to `buffer.len()` bytes.
    ///
    /// `Ok(0)` means nothing arrived before the platform gave up waiting, not
    /// end of file.
    async fn read(
        &self,
        handle: &Self::Handle,
        poller: &Self::Poller,
        buffer: &mut [u8],
    ) -> DeviceResult<usize>;

    /// Write all of `data`.
    async fn write(
        &self,
        handle: &Self::Handle,
        poller: &Self::Poller,
        data: &[u8],
    ) -> DeviceResult<()>;

    /// Drive the control lines.
    async fn set(&self, handle: &Self::Handle, options: &SetOptions) -> DeviceResult<()>;

    /// Sample the modem status lines.
    async fn get(&self, handle: &Self::Handle) -> DeviceResult<PortStatus>;

    /// Block until all queued output has been transmitted.
    async fn drain(&self, handle: &Self::Handle) -> DeviceResult<()>;

    /// Discard unread input and untransmitted output.
    async fn flush(&self, handle: &Self::Handle) -> DeviceResult<()>;

    /// Change the baud rate of an open port.
    async fn update(&self, handle: &Self::Handle, baud_rate: u32) -> DeviceResult<()>;

    /// Enumerate the serial ports present on the system.
    async fn list() -> DeviceResult<Vec<PortInfo>>;
}

/// Kind of hardware behind a listed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// Descriptor produced by port enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
}

impl PortInfo {
    /// A descriptor carrying only a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port_type: PortType::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
            vendor_id: None,
            product_id: None,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut port = PortInfo::new(info.port_name);
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                port.port_type = PortType::Usb;
                port.vendor_id = Some(usb.vid);
                port.product_id = Some(usb.pid);
                port.serial_number = usb.serial_number;
                port.manufacturer = usb.manufacturer;
                port.product = usb.product;
            }
            serialport::SerialPortType::PciPort => port.port_type = PortType::Pci,
            serialport::SerialPortType::BluetoothPort => port.port_type = PortType::Bluetooth,
            serialport::SerialPortType::Unknown => {}
        }
        port
    }
}

/// Shared `list` implementation for the OS-backed layers.
#[cfg(any(unix, windows))]
pub(crate) async fn list_system_ports() -> DeviceResult<Vec<PortInfo>> {
    let ports = tokio::task::spawn_blocking(serialport::available_ports)
        .await
        .map_err(|e| DeviceError::Io(std::io::Error::other(e)))??;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_port_info_from_usb() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A50285BI".to_string()),
                manufacturer: Some("FTDI".to_string()),
                product: Some("FT232R USB UART".to_string()),
            }),
        };

        let port = PortInfo::from(info);
        assert_eq!(port.path, "/dev/ttyUSB0");
        assert_eq!(port.port_type, PortType::Usb);
        assert_eq!(port.vendor_id, Some(0x0403));
        assert_eq!(port.product_id, Some(0x6001));
        assert_eq!(port.manufacturer.as_deref(), Some("FTDI"));
        assert_eq!(port.serial_number.as_deref(), Some("A50285BI"));
    }

    #[test]
    fn test_port_info_serializes_sparse() {
        let json = serde_json::to_value(PortInfo::new("COM3")).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "COM3", "portType": "unknown" }));
    }
}
