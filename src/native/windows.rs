//! Win32 handle layer.
//!
//! Ports are opened with `FILE_FLAG_OVERLAPPED` and configured through the
//! DCB. The read timeouts are set so a read completes as soon as any byte
//! arrives, or with zero bytes after [`READ_TIMEOUT_MS`] of silence.
//!
//! The readiness poller is a manual-reset event used for overlapped reads.
//! Reads wait on it from the blocking pool; closing the poller cancels the
//! outstanding read, waits for it to unwind and only then frees the event.

use super::error::{DeviceError, DeviceResult};
use super::{HandleLayer, PortInfo, ReadinessPoller};
use crate::options::{OpenOptions, Parity, PortStatus, SetOptions, StopBits};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::ffi::OsStr;
use std::io;
use std::iter::once;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, TRUE};
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_BAD_COMMAND, ERROR_DEVICE_NOT_CONNECTED, ERROR_FILE_NOT_FOUND,
    ERROR_GEN_FAILURE, ERROR_IO_PENDING,
};
use winapi::um::commapi::{
    EscapeCommFunction, GetCommModemStatus, GetCommState, PurgeComm, SetCommState,
    SetCommTimeouts,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{CreateFileW, FlushFileBuffers, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{CancelIoEx, GetOverlappedResult};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::CreateEventW;
use winapi::um::winbase::{
    CLRBREAK, CLRDTR, CLRRTS, COMMTIMEOUTS, DCB, DTR_CONTROL_ENABLE, EVENPARITY,
    FILE_FLAG_OVERLAPPED, MS_CTS_ON, MS_DSR_ON, MS_RLSD_ON, NOPARITY, ODDPARITY, ONESTOPBIT,
    PURGE_RXABORT, PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, RTS_CONTROL_ENABLE,
    RTS_CONTROL_HANDSHAKE, SETBREAK, SETDTR, SETRTS, TWOSTOPBITS,
};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE, MAXDWORD};

/// Silence after which a pending read completes with zero bytes.
pub const READ_TIMEOUT_MS: DWORD = 1000;

/// How long closing the poller waits before cancelling again.
const CANCEL_RETRY: Duration = Duration::from_millis(10);

/// `GetLastError` codes that mean the device went away.
pub(crate) fn is_disconnect_code(code: i32) -> bool {
    matches!(
        code as DWORD,
        ERROR_ACCESS_DENIED | ERROR_BAD_COMMAND | ERROR_GEN_FAILURE | ERROR_DEVICE_NOT_CONNECTED
    )
}

struct OwnedHandle(HANDLE);

// Kernel handles may be used from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }

    fn into_raw(self) -> HANDLE {
        let raw = self.0;
        mem::forget(self);
        raw
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// An open COM port.
pub struct WindowsHandle {
    path: String,
    port: Arc<OwnedHandle>,
}

impl std::fmt::Debug for WindowsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsHandle")
            .field("path", &self.path)
            .finish()
    }
}

/// Admits reads on the blocking pool until the poller closes.
///
/// A read holds the gate for as long as its `ReadFile` is outstanding.
#[derive(Debug, Default)]
struct ReadGate {
    closed: Mutex<bool>,
}

impl ReadGate {
    /// `None` once closed: the read must not touch the port.
    fn enter(&self) -> Option<MutexGuard<'_, bool>> {
        let guard = self.closed.lock();
        (!*guard).then_some(guard)
    }

    /// Run `cancel` until no read holds the gate, then close it.
    fn close(&self, cancel: impl Fn()) {
        loop {
            cancel();
            if let Some(mut closed) = self.closed.try_lock_for(CANCEL_RETRY) {
                *closed = true;
                return;
            }
        }
    }
}

/// Overlapped-read event for one port.
pub struct WindowsPoller {
    port: Arc<OwnedHandle>,
    event: Arc<OwnedHandle>,
    gate: Arc<ReadGate>,
}

impl ReadinessPoller for WindowsPoller {}

impl Drop for WindowsPoller {
    fn drop(&mut self) {
        let port = self.port.raw();
        // Fails with ERROR_NOT_FOUND when nothing is pending.
        self.gate.close(|| unsafe {
            CancelIoEx(port, ptr::null_mut());
        });
    }
}

/// Handle layer for Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsLayer;

impl WindowsLayer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HandleLayer for WindowsLayer {
    type Handle = WindowsHandle;
    type Poller = WindowsPoller;

    async fn open(&self, path: &str, options: &OpenOptions) -> DeviceResult<WindowsHandle> {
        let device = if path.starts_with(r"\\.\") {
            path.to_string()
        } else {
            format!(r"\\.\{path}")
        };
        let wide: Vec<u16> = OsStr::new(&device).encode_wide().chain(once(0)).collect();
        let name = path.to_string();
        let options = options.clone();

        let port = tokio::task::spawn_blocking(move || -> DeviceResult<OwnedHandle> {
            // Share mode 0: COM ports are always exclusive, so `lock` is implied.
            let raw = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    0,
                    ptr::null_mut(),
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    ptr::null_mut(),
                )
            };
            if raw == INVALID_HANDLE_VALUE {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) {
                    return Err(DeviceError::not_found(name));
                }
                return Err(err.into());
            }
            let port = OwnedHandle(raw);
            configure(port.raw(), &options)?;
            Ok(port)
        })
        .await
        .map_err(join_error)??;

        debug!(path, "COM port opened");
        Ok(WindowsHandle {
            path: path.to_string(),
            port: Arc::new(port),
        })
    }

    fn poller(&self, handle: &WindowsHandle) -> DeviceResult<WindowsPoller> {
        Ok(WindowsPoller {
            port: Arc::clone(&handle.port),
            event: Arc::new(create_event()?),
            gate: Arc::new(ReadGate::default()),
        })
    }

    async fn close(&self, handle: WindowsHandle) -> DeviceResult<()> {
        let WindowsHandle { path, port } = handle;
        match Arc::try_unwrap(port) {
            Ok(port) => {
                cvt(unsafe { CloseHandle(port.into_raw()) })?;
                debug!(path = %path, "COM port closed");
            }
            Err(shared) => {
                debug!(path = %path, "COM port release deferred to in-flight call");
                drop(shared);
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        handle: &WindowsHandle,
        poller: &WindowsPoller,
        buffer: &mut [u8],
    ) -> DeviceResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let len = buffer.len();
        let port = Arc::clone(&handle.port);
        let event = Arc::clone(&poller.event);
        let gate = Arc::clone(&poller.gate);

        let data = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let Some(_entered) = gate.enter() else {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "read abandoned: poller closed",
                ));
            };
            let mut data = vec![0u8; len];
            let target = data.as_mut_ptr();
            let count = overlapped_io(port.raw(), event.raw(), |overlapped| unsafe {
                ReadFile(
                    port.raw(),
                    target.cast(),
                    len as DWORD,
                    ptr::null_mut(),
                    overlapped,
                )
            })?;
            data.truncate(count);
            Ok(data)
        })
        .await
        .map_err(join_error)??;

        buffer[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn write(
        &self,
        handle: &WindowsHandle,
        _poller: &WindowsPoller,
        data: &[u8],
    ) -> DeviceResult<()> {
        let port = Arc::clone(&handle.port);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> io::Result<()> {
            // Writes get their own event so they can overlap a pending read.
            let event = create_event()?;
            let mut offset = 0;
            while offset < data.len() {
                let chunk = &data[offset..];
                offset += overlapped_io(port.raw(), event.raw(), |overlapped| unsafe {
                    WriteFile(
                        port.raw(),
                        chunk.as_ptr().cast(),
                        chunk.len() as DWORD,
                        ptr::null_mut(),
                        overlapped,
                    )
                })?;
            }
            Ok(())
        })
        .await
        .map_err(join_error)??;
        Ok(())
    }

    async fn set(&self, handle: &WindowsHandle, options: &SetOptions) -> DeviceResult<()> {
        let port = handle.port.raw();
        escape(port, if options.rts { SETRTS } else { CLRRTS })?;
        escape(port, if options.dtr { SETDTR } else { CLRDTR })?;
        escape(port, if options.brk { SETBREAK } else { CLRBREAK })?;
        Ok(())
    }

    async fn get(&self, handle: &WindowsHandle) -> DeviceResult<PortStatus> {
        let mut status: DWORD = 0;
        cvt(unsafe { GetCommModemStatus(handle.port.raw(), &mut status) })?;
        Ok(PortStatus {
            cts: status & MS_CTS_ON != 0,
            dsr: status & MS_DSR_ON != 0,
            dcd: status & MS_RLSD_ON != 0,
        })
    }

    async fn drain(&self, handle: &WindowsHandle) -> DeviceResult<()> {
        let port = Arc::clone(&handle.port);
        tokio::task::spawn_blocking(move || cvt(unsafe { FlushFileBuffers(port.raw()) }))
            .await
            .map_err(join_error)??;
        Ok(())
    }

    async fn flush(&self, handle: &WindowsHandle) -> DeviceResult<()> {
        cvt(unsafe {
            PurgeComm(
                handle.port.raw(),
                PURGE_RXCLEAR | PURGE_TXCLEAR | PURGE_RXABORT | PURGE_TXABORT,
            )
        })?;
        Ok(())
    }

    async fn update(&self, handle: &WindowsHandle, baud_rate: u32) -> DeviceResult<()> {
        let port = handle.port.raw();
        let mut dcb = comm_state(port)?;
        dcb.BaudRate = baud_rate;
        cvt(unsafe { SetCommState(port, &mut dcb) })?;
        Ok(())
    }

    async fn list() -> DeviceResult<Vec<PortInfo>> {
        super::list_system_ports().await
    }
}

fn cvt(ok: BOOL) -> io::Result<()> {
    if ok == FALSE {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn join_error(err: tokio::task::JoinError) -> DeviceError {
    DeviceError::Io(io::Error::other(err))
}

fn escape(port: HANDLE, function: DWORD) -> io::Result<()> {
    cvt(unsafe { EscapeCommFunction(port, function) })
}

fn create_event() -> io::Result<OwnedHandle> {
    let raw = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
    if raw.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(OwnedHandle(raw))
}

/// Start an overlapped operation and wait for it to complete.
fn overlapped_io(
    port: HANDLE,
    event: HANDLE,
    start: impl FnOnce(*mut OVERLAPPED) -> BOOL,
) -> io::Result<usize> {
    let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
    overlapped.hEvent = event;
    if start(&mut overlapped) == FALSE {
        let code = unsafe { GetLastError() };
        if code != ERROR_IO_PENDING {
            return Err(io::Error::from_raw_os_error(code as i32));
        }
    }
    let mut transferred: DWORD = 0;
    cvt(unsafe { GetOverlappedResult(port, &mut overlapped, &mut transferred, TRUE) })?;
    Ok(transferred as usize)
}

fn comm_state(port: HANDLE) -> io::Result<DCB> {
    let mut dcb: DCB = unsafe { mem::zeroed() };
    dcb.DCBlength = mem::size_of::<DCB>() as DWORD;
    cvt(unsafe { GetCommState(port, &mut dcb) })?;
    Ok(dcb)
}

fn configure(port: HANDLE, options: &OpenOptions) -> io::Result<()> {
    let mut dcb = comm_state(port)?;
    dcb.BaudRate = options.baud_rate;
    dcb.ByteSize = u8::from(options.data_bits);
    dcb.Parity = match options.parity {
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Even => EVENPARITY,
    };
    dcb.StopBits = match options.stop_bits {
        StopBits::One => ONESTOPBIT,
        StopBits::Two => TWOSTOPBITS,
    };
    dcb.set_fBinary(TRUE as DWORD);
    dcb.set_fParity((options.parity != Parity::None) as DWORD);
    dcb.set_fOutxCtsFlow(options.rts_cts as DWORD);
    dcb.set_fOutxDsrFlow(0);
    dcb.set_fRtsControl(if options.rts_cts {
        RTS_CONTROL_HANDSHAKE
    } else {
        RTS_CONTROL_ENABLE
    });
    dcb.set_fDtrControl(DTR_CONTROL_ENABLE);
    dcb.set_fOutX(options.xon as DWORD);
    dcb.set_fInX(options.xoff as DWORD);
    dcb.set_fAbortOnError(0);
    dcb.XonChar = 0x11;
    dcb.XoffChar = 0x13;
    cvt(unsafe { SetCommState(port, &mut dcb) })?;

    let mut timeouts = COMMTIMEOUTS {
        ReadIntervalTimeout: MAXDWORD,
        ReadTotalTimeoutMultiplier: MAXDWORD,
        ReadTotalTimeoutConstant: READ_TIMEOUT_MS,
        WriteTotalTimeoutMultiplier: 0,
        WriteTotalTimeoutConstant: 0,
    };
    cvt(unsafe { SetCommTimeouts(port, &mut timeouts) })?;
    cvt(unsafe { PurgeComm(port, PURGE_RXCLEAR | PURGE_TXCLEAR) })?;
    Ok(())
}
