//! POSIX handle layer.
//!
//! Ports are opened and configured through `serialport` (termios), then the
//! descriptor is switched to `O_NONBLOCK`. The readiness poller registers a
//! duplicate of that descriptor with the tokio reactor (epoll/kqueue) through
//! [`AsyncFd`]; reads and writes go through the duplicate, and it is dropped
//! before the port itself is closed.
//!
//! Control lines, buffer clearing, draining and baud changes use the
//! `serialport` API on the owned [`TTYPort`].

use super::error::{open_error, DeviceError, DeviceResult};
use super::{HandleLayer, PortInfo, ReadinessPoller};
use crate::options::{OpenOptions, PortStatus, SetOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{ClearBuffer, SerialPort, TTYPort};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

/// `errno` values that mean the tty went away.
pub(crate) fn is_disconnect_code(code: i32) -> bool {
    matches!(code, libc::EIO | libc::ENXIO | libc::ENODEV)
}

/// An open tty.
pub struct UnixHandle {
    path: String,
    port: Mutex<TTYPort>,
}

impl std::fmt::Debug for UnixHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixHandle")
            .field("path", &self.path)
            .finish()
    }
}

/// Reactor registration for a duplicate of the tty descriptor.
#[derive(Debug)]
pub struct UnixPoller {
    io: AsyncFd<File>,
}

impl ReadinessPoller for UnixPoller {}

/// Handle layer for Linux, macOS and the BSDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixLayer;

impl UnixLayer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HandleLayer for UnixLayer {
    type Handle = UnixHandle;
    type Poller = UnixPoller;

    async fn open(&self, path: &str, options: &OpenOptions) -> DeviceResult<UnixHandle> {
        let builder = serialport::new(path, options.baud_rate)
            .data_bits(options.data_bits.into())
            .stop_bits(options.stop_bits.into())
            .parity(options.parity.into())
            .flow_control(options.flow_control())
            .timeout(Duration::ZERO);
        let name = path.to_string();
        let options = options.clone();

        let port = tokio::task::spawn_blocking(move || -> DeviceResult<TTYPort> {
            let mut port = builder.open_native().map_err(|e| open_error(&name, e))?;
            port.set_exclusive(options.lock)?;
            let fd = port.as_raw_fd();
            set_hupcl(fd, options.hupcl)?;
            // Rewriting termios can drop a non-standard speed on Linux.
            port.set_baud_rate(options.baud_rate)?;
            set_nonblocking(fd)?;
            Ok(port)
        })
        .await
        .map_err(join_error)??;

        debug!(path, fd = port.as_raw_fd(), "tty opened");
        Ok(UnixHandle {
            path: path.to_string(),
            port: Mutex::new(port),
        })
    }

    fn poller(&self, handle: &UnixHandle) -> DeviceResult<UnixPoller> {
        let duplicate = handle.port.lock().try_clone_native()?;
        Ok(UnixPoller {
            io: AsyncFd::new(into_file(duplicate))?,
        })
    }

    async fn close(&self, handle: UnixHandle) -> DeviceResult<()> {
        let UnixHandle { path, port } = handle;
        drop(port.into_inner());
        debug!(path = %path, "tty closed");
        Ok(())
    }

    async fn read(
        &self,
        handle: &UnixHandle,
        poller: &UnixPoller,
        buffer: &mut [u8],
    ) -> DeviceResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        loop {
            let mut guard = poller.io.readable().await?;
            let hung_up = guard.ready().is_read_closed();
            let attempt = guard.try_io(|io| {
                let mut file = io.get_ref();
                file.read(buffer)
            });
            match attempt {
                Ok(Ok(0)) if hung_up => {
                    return Err(DeviceError::disconnected(format!(
                        "{} hung up",
                        handle.path
                    )));
                }
                Ok(Ok(0)) => {
                    guard.clear_ready();
                    return Ok(0);
                }
                Ok(result) => return result.map_err(DeviceError::from),
                Err(_would_block) => {
                    trace!(path = %handle.path, "spurious readiness");
                    continue;
                }
            }
        }
    }

    async fn write(
        &self,
        _handle: &UnixHandle,
        poller: &UnixPoller,
        data: &[u8],
    ) -> DeviceResult<()> {
        let mut written = 0;
        while written < data.len() {
            let mut guard = poller.io.writable().await?;
            let attempt = guard.try_io(|io| {
                let mut file = io.get_ref();
                file.write(&data[written..])
            });
            match attempt {
                Ok(Ok(count)) => written += count,
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn set(&self, handle: &UnixHandle, options: &SetOptions) -> DeviceResult<()> {
        let mut port = handle.port.lock();
        port.write_request_to_send(options.rts)?;
        port.write_data_terminal_ready(options.dtr)?;
        if options.brk {
            port.set_break()?;
        } else {
            port.clear_break()?;
        }
        Ok(())
    }

    async fn get(&self, handle: &UnixHandle) -> DeviceResult<PortStatus> {
        let mut port = handle.port.lock();
        Ok(PortStatus {
            cts: port.read_clear_to_send()?,
            dsr: port.read_data_set_ready()?,
            dcd: port.read_carrier_detect()?,
        })
    }

    async fn drain(&self, handle: &UnixHandle) -> DeviceResult<()> {
        let mut duplicate = handle.port.lock().try_clone_native()?;
        tokio::task::spawn_blocking(move || {
            let result = duplicate.flush();
            drop(into_file(duplicate));
            result
        })
        .await
        .map_err(join_error)??;
        Ok(())
    }

    async fn flush(&self, handle: &UnixHandle) -> DeviceResult<()> {
        handle.port.lock().clear(ClearBuffer::All)?;
        Ok(())
    }

    async fn update(&self, handle: &UnixHandle, baud_rate: u32) -> DeviceResult<()> {
        handle.port.lock().set_baud_rate(baud_rate)?;
        Ok(())
    }

    async fn list() -> DeviceResult<Vec<PortInfo>> {
        super::list_system_ports().await
    }
}

/// Take ownership of a duplicated descriptor as a plain file.
///
/// Dropping a `TTYPort` also clears exclusive mode on the shared tty, which
/// must only happen when the handle itself closes.
fn into_file(duplicate: TTYPort) -> File {
    // The descriptor was just released by `into_raw_fd` and has no other owner.
    unsafe { File::from_raw_fd(duplicate.into_raw_fd()) }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn join_error(err: tokio::task::JoinError) -> DeviceError {
    DeviceError::Io(io::Error::other(err))
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

fn set_hupcl(fd: RawFd, hupcl: bool) -> io::Result<()> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    cvt(unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) })?;
    let mut termios = unsafe { termios.assume_init() };
    if hupcl {
        termios.c_cflag |= libc::HUPCL;
    } else {
        termios.c_cflag &= !libc::HUPCL;
    }
    cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) })?;
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::ffi::CStr;

    /// Pseudo-terminal pair: the master end stays with the test, the slave
    /// path is opened through the layer like a real device.
    struct Pty {
        master: Option<File>,
        slave_path: String,
    }

    impl Pty {
        fn new() -> Self {
            unsafe {
                let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
                assert!(master >= 0, "posix_openpt failed");
                assert_eq!(libc::grantpt(master), 0);
                assert_eq!(libc::unlockpt(master), 0);
                let mut name = [0 as libc::c_char; 128];
                assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
                let slave_path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();
                Self {
                    master: Some(File::from_raw_fd(master)),
                    slave_path,
                }
            }
        }

        fn master(&self) -> &File {
            self.master.as_ref().expect("master still open")
        }

        fn send(&self, data: &[u8]) {
            let mut master = self.master();
            master.write_all(data).unwrap();
        }

        fn receive(&self, buffer: &mut [u8]) -> usize {
            let mut master = self.master();
            master.read(buffer).unwrap()
        }

        fn hang_up(&mut self) {
            self.master = None;
        }
    }

    fn options() -> OpenOptions {
        OpenOptions {
            baud_rate: 115200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_missing_path_not_found() {
        let err = UnixLayer
            .open("/dev/nonexistent_port_12345", &options())
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(name) if name.contains("nonexistent")));
    }

    #[tokio::test]
    async fn test_read_from_pty() {
        let pty = Pty::new();
        let handle = UnixLayer.open(&pty.slave_path, &options()).await.unwrap();
        let poller = UnixLayer.poller(&handle).unwrap();

        pty.send(b"hello");
        let mut buffer = [0u8; 16];
        let n = UnixLayer.read(&handle, &poller, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"hello");

        poller.close();
        UnixLayer.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_reaches_master() {
        let pty = Pty::new();
        let handle = UnixLayer.open(&pty.slave_path, &options()).await.unwrap();
        let poller = UnixLayer.poller(&handle).unwrap();

        UnixLayer.write(&handle, &poller, b"AT\r").await.unwrap();
        UnixLayer.drain(&handle).await.unwrap();

        let mut buffer = [0u8; 8];
        let n = pty.receive(&mut buffer);
        assert_eq!(&buffer[..n], b"AT\r");

        poller.close();
        UnixLayer.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_discards_pending_input() {
        let pty = Pty::new();
        let handle = UnixLayer.open(&pty.slave_path, &options()).await.unwrap();
        let poller = UnixLayer.poller(&handle).unwrap();

        pty.send(b"stale");
        tokio::time::sleep(Duration::from_millis(20)).await;
        UnixLayer.flush(&handle).await.unwrap();

        pty.send(b"fresh");
        let mut buffer = [0u8; 16];
        let n = UnixLayer.read(&handle, &poller, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"fresh");

        poller.close();
        UnixLayer.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_keeps_port_usable() {
        let pty = Pty::new();
        let handle = UnixLayer.open(&pty.slave_path, &options()).await.unwrap();
        let poller = UnixLayer.poller(&handle).unwrap();

        UnixLayer.drain(&handle).await.unwrap();
        UnixLayer.drain(&handle).await.unwrap();

        pty.send(b"ok");
        let mut buffer = [0u8; 4];
        let n = UnixLayer.read(&handle, &poller, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"ok");

        poller.close();
        UnixLayer.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_master_hang_up_is_disconnect() {
        let mut pty = Pty::new();
        let handle = UnixLayer.open(&pty.slave_path, &options()).await.unwrap();
        let poller = UnixLayer.poller(&handle).unwrap();

        pty.hang_up();
        let mut buffer = [0u8; 16];
        let err = UnixLayer.read(&handle, &poller, &mut buffer).await.unwrap_err();
        assert!(err.is_disconnect(), "unexpected error: {err}");

        poller.close();
        let _ = UnixLayer.close(handle).await;
    }
}
