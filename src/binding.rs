//! The uniform asynchronous port contract.
//!
//! A [`Binding`] drives one port through a [`HandleLayer`]. Every operation is
//! a plain method with two failure channels:
//!
//! * the outer `Result` rejects malformed calls with
//!   [`BindingError::InvalidArgument`] before the handle layer is touched;
//! * the returned future resolves runtime conditions (`PortNotOpen`,
//!   `AlreadyOpen`, device failures).
//!
//! `Binding` is a cheap handle onto shared state. Clones drive the same port,
//! and the futures it hands out are `'static`, so they can be spawned or held
//! by a [`PushSource`](crate::PushSource).
//!
//! # Example
//! ```no_run
//! use serial_bindings::{NativeBinding, OpenOptions};
//!
//! # async fn demo() -> serial_bindings::BindingResult<()> {
//! let binding = NativeBinding::native(|signal| {
//!     eprintln!("{} went away: {}", signal.path, signal.reason);
//! });
//! binding.open("/dev/ttyUSB0", OpenOptions::new(115200))?.await?;
//! binding.write(&b"AT\r"[..])?.await?;
//! binding.close()?.await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BindingError, BindingResult};
use crate::native::{DeviceResult, HandleLayer, PortInfo, ReadinessPoller};
use crate::options::{validate_baud_rate, OpenOptions, PortStatus, SetOptions};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

#[cfg(any(unix, windows))]
use crate::native::NativeLayer;

/// Future returned by binding operations.
pub type BindingFuture<T> = BoxFuture<'static, BindingResult<T>>;

/// Future returned by [`Binding::read`].
pub type ReadFuture = BindingFuture<ReadOutcome>;

/// Binding over the handle layer of the current platform.
#[cfg(any(unix, windows))]
pub type NativeBinding = Binding<NativeLayer>;

/// Delivered to the disconnect callback when the device goes away while
/// the port is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectSignal {
    pub path: String,
    pub reason: String,
}

/// Result of a completed read.
///
/// `bytes_read` bytes were written into `buffer` starting at the requested
/// offset. Zero means nothing arrived in time; it never means end of stream.
#[derive(Debug)]
pub struct ReadOutcome {
    pub bytes_read: usize,
    pub buffer: BytesMut,
}

type DisconnectFn = Arc<dyn Fn(DisconnectSignal) + Send + Sync>;

/// One open session. Operations hold an `Arc` of it only while they run.
struct OpenPort<L: HandleLayer> {
    path: String,
    // Declared before `handle`: drop order releases the poller first.
    poller: Option<L::Poller>,
    handle: L::Handle,
    disconnected: AtomicBool,
    /// Raised once by `close`; never lowered for this session.
    closed: watch::Sender<bool>,
}

struct Inner<L: HandleLayer> {
    layer: L,
    state: RwLock<Option<Arc<OpenPort<L>>>>,
    /// Serializes `open` and `close`.
    transition: Mutex<()>,
    on_disconnect: DisconnectFn,
}

/// Run a handle-only primitive against the open port, abandoning it if the
/// port is closed underneath it.
macro_rules! on_handle {
    ($inner:expr, |$layer:ident, $handle:ident| $call:expr) => {{
        let port = $inner.current()?;
        $inner
            .guarded(&port, async {
                let ($layer, $handle) = (&$inner.layer, &port.handle);
                $inner.report(&port, $call.await)
            })
            .await
    }};
}

/// One open or closed connection to a serial port.
pub struct Binding<L: HandleLayer> {
    inner: Arc<Inner<L>>,
}

impl<L: HandleLayer> Clone for Binding<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: HandleLayer> std::fmt::Debug for Binding<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("open", &self.is_open())
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(any(unix, windows))]
impl Binding<NativeLayer> {
    /// A binding over the platform's native handle layer.
    pub fn native<F>(on_disconnect: F) -> Self
    where
        F: Fn(DisconnectSignal) + Send + Sync + 'static,
    {
        Self::new(NativeLayer::default(), on_disconnect)
    }
}

impl<L: HandleLayer> Binding<L> {
    /// Create an unopened binding. `on_disconnect` runs once per open session
    /// if the device disappears underneath it.
    pub fn new<F>(layer: L, on_disconnect: F) -> Self
    where
        F: Fn(DisconnectSignal) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                layer,
                state: RwLock::new(None),
                transition: Mutex::new(()),
                on_disconnect: Arc::new(on_disconnect),
            }),
        }
    }

    /// Whether a handle is currently held.
    pub fn is_open(&self) -> bool {
        self.inner.state.read().is_some()
    }

    /// Path of the open port, `None` when closed.
    pub fn path(&self) -> Option<String> {
        self.inner.state.read().as_ref().map(|port| port.path.clone())
    }

    /// Enumerate the serial ports on the system.
    pub fn list() -> BindingResult<BindingFuture<Vec<PortInfo>>> {
        Ok(Box::pin(async { Ok(L::list().await?) }))
    }

    /// Open `path` with `options`.
    pub fn open(&self, path: &str, options: OpenOptions) -> BindingResult<BindingFuture<()>> {
        if path.is_empty() {
            return Err(BindingError::invalid_argument(
                "\"path\" is not a valid port",
            ));
        }
        options.validate()?;

        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        Ok(Box::pin(async move {
            let _transition = inner.transition.lock().await;
            if inner.state.read().is_some() {
                return Err(BindingError::AlreadyOpen);
            }

            let handle = inner.layer.open(&path, &options).await?;
            let poller = match inner.layer.poller(&handle) {
                Ok(poller) => poller,
                Err(err) => {
                    if let Err(close_err) = inner.layer.close(handle).await {
                        warn!(path = %path, error = %close_err, "failed to release handle after poller error");
                    }
                    return Err(err.into());
                }
            };

            let (closed, _) = watch::channel(false);
            *inner.state.write() = Some(Arc::new(OpenPort {
                path: path.clone(),
                poller: Some(poller),
                handle,
                disconnected: AtomicBool::new(false),
                closed,
            }));
            info!(path = %path, baud_rate = options.baud_rate, "port opened");
            Ok(())
        }))
    }

    /// Close the port. Operations still in flight resolve `PortNotOpen`.
    ///
    /// When nothing else holds the session the poller and then the handle are
    /// released before this resolves. Otherwise the last in-flight operation
    /// to let go releases them, in the same order. The port is closed
    /// afterwards even if the OS reports a failure while releasing the handle.
    pub fn close(&self) -> BindingResult<BindingFuture<()>> {
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            let _transition = inner.transition.lock().await;
            let taken = inner.state.write().take();
            let port = taken.ok_or(BindingError::PortNotOpen)?;
            port.closed.send_replace(true);

            match Arc::try_unwrap(port) {
                Ok(mut port) => {
                    if let Some(poller) = port.poller.take() {
                        poller.close();
                    }
                    let OpenPort { path, handle, .. } = port;
                    inner.layer.close(handle).await?;
                    info!(path = %path, "port closed");
                }
                Err(shared) => {
                    info!(path = %shared.path, "port closed; release deferred to in-flight operations");
                }
            }
            Ok(())
        }))
    }

    /// Read up to `length` bytes into `buffer[offset..offset + length]`.
    ///
    /// The buffer comes back in the [`ReadOutcome`].
    pub fn read(
        &self,
        mut buffer: BytesMut,
        offset: usize,
        length: usize,
    ) -> BindingResult<ReadFuture> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(|| {
                BindingError::invalid_argument(format!(
                    "\"offset\" + \"length\" ({offset} + {length}) is greater than the buffer length {}",
                    buffer.len()
                ))
            })?;

        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            let port = inner.current()?;
            let bytes_read = inner
                .guarded(&port, async {
                    let poller = port.poller.as_ref().ok_or(BindingError::PortNotOpen)?;
                    let result = inner
                        .layer
                        .read(&port.handle, poller, &mut buffer[offset..end])
                        .await;
                    inner.report(&port, result)
                })
                .await?;
            Ok(ReadOutcome { bytes_read, buffer })
        }))
    }

    /// Write all of `data`.
    pub fn write(&self, data: impl Into<Bytes>) -> BindingResult<BindingFuture<()>> {
        let data = data.into();
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            let port = inner.current()?;
            inner
                .guarded(&port, async {
                    let poller = port.poller.as_ref().ok_or(BindingError::PortNotOpen)?;
                    let result = inner.layer.write(&port.handle, poller, &data).await;
                    inner.report(&port, result)
                })
                .await
        }))
    }

    /// Drive the control lines.
    pub fn set(&self, options: SetOptions) -> BindingResult<BindingFuture<()>> {
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            on_handle!(inner, |layer, handle| layer.set(handle, &options))
        }))
    }

    /// Sample the modem status lines.
    pub fn get(&self) -> BindingResult<BindingFuture<PortStatus>> {
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            on_handle!(inner, |layer, handle| layer.get(handle))
        }))
    }

    /// Wait until queued output has been transmitted.
    pub fn drain(&self) -> BindingResult<BindingFuture<()>> {
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            on_handle!(inner, |layer, handle| layer.drain(handle))
        }))
    }

    /// Discard unread input and untransmitted output.
    pub fn flush(&self) -> BindingResult<BindingFuture<()>> {
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            on_handle!(inner, |layer, handle| layer.flush(handle))
        }))
    }

    /// Change the baud rate of the open port.
    pub fn update(&self, baud_rate: u32) -> BindingResult<BindingFuture<()>> {
        validate_baud_rate(baud_rate)?;
        let inner = Arc::clone(&self.inner);
        Ok(Box::pin(async move {
            on_handle!(inner, |layer, handle| layer.update(handle, baud_rate))?;
            debug!(baud_rate, "baud rate updated");
            Ok(())
        }))
    }
}

impl<L: HandleLayer> Inner<L> {
    /// The open session, if any.
    fn current(&self) -> BindingResult<Arc<OpenPort<L>>> {
        self.state.read().clone().ok_or(BindingError::PortNotOpen)
    }

    /// Run `op`, abandoning it with `PortNotOpen` once `port` is closed.
    async fn guarded<T>(
        &self,
        port: &OpenPort<L>,
        op: impl Future<Output = BindingResult<T>>,
    ) -> BindingResult<T> {
        let mut closed = port.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(BindingError::PortNotOpen),
            result = op => result,
        }
    }

    /// Surface a device result, firing the disconnect callback the first time
    /// the device is reported gone.
    fn report<T>(&self, port: &OpenPort<L>, result: DeviceResult<T>) -> BindingResult<T> {
        if let Err(err) = &result {
            if err.is_disconnect() && !port.disconnected.swap(true, Ordering::SeqCst) {
                warn!(path = %port.path, error = %err, "device disconnected");
                (self.on_disconnect)(DisconnectSignal {
                    path: port.path.clone(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(result?)
    }
}
