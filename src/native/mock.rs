//! In-memory handle layer serving virtual ports.
//!
//! Ports live in a process-wide registry keyed by path, so `list()` (which
//! has no instance to consult) sees the same ports `open()` does. A
//! [`MockPort`] is the test-side view of one virtual device: feed it inbound
//! bytes, inspect what was written, inject faults, or unplug it.
//!
//! # Example
//! ```
//! use serial_bindings::native::MockPort;
//!
//! let port = MockPort::register("/dev/ttyDOC0");
//! port.enqueue_read(b"Hello, World!");
//! assert_eq!(port.available_bytes(), 13);
//! ```

use super::error::{DeviceError, DeviceResult};
use super::{HandleLayer, PortInfo, ReadinessPoller};
use crate::options::{OpenOptions, PortStatus, SetOptions};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use tokio::sync::Notify;

static REGISTRY: Lazy<Mutex<HashMap<String, MockPort>>> = Lazy::new(Default::default);

/// Handle-layer operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Close,
    Read,
    Write,
    Set,
    Get,
    Drain,
    Flush,
    Update,
}

/// Failure injected into the next call of a [`MockOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Fail with an I/O error of this kind.
    Io(io::ErrorKind),
    /// Fail as if the device had been removed.
    Disconnect,
}

impl MockFault {
    fn into_error(self, path: &str) -> DeviceError {
        match self {
            Self::Io(kind) => DeviceError::Io(io::Error::new(kind, format!("injected fault on {path}"))),
            Self::Disconnect => DeviceError::disconnected(format!("{path} was removed")),
        }
    }
}

/// Resource release recorded by the mock layer, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownEvent {
    PollerClosed,
    HandleClosed,
}

#[derive(Debug, Default)]
struct MockPortState {
    info: Option<PortInfo>,
    /// Bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Log of all writes, one entry per call.
    write_log: Vec<Vec<u8>>,
    /// Number of upcoming reads that complete with zero bytes.
    zero_reads: usize,
    faults: HashMap<MockOp, MockFault>,
    status: PortStatus,
    last_set: Option<SetOptions>,
    options: Option<OpenOptions>,
    baud_rate: Option<u32>,
    loopback: bool,
    unplugged: bool,
    handle_open: bool,
    reads_in_flight: usize,
    max_reads_in_flight: usize,
    reads_started: usize,
    drain_count: usize,
    flush_count: usize,
    teardown: Vec<TeardownEvent>,
}

/// Test-side view of one virtual device.
#[derive(Clone)]
pub struct MockPort {
    path: String,
    state: Arc<Mutex<MockPortState>>,
    readable: Arc<Notify>,
}

impl MockPort {
    /// Register a virtual port at `path`, replacing any previous one.
    pub fn register(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::register_with_info(PortInfo::new(path))
    }

    /// Register a virtual port that lists with the given metadata.
    pub fn register_with_info(info: PortInfo) -> Self {
        let port = Self {
            path: info.path.clone(),
            state: Arc::new(Mutex::new(MockPortState {
                info: Some(info),
                ..Default::default()
            })),
            readable: Arc::new(Notify::new()),
        };
        REGISTRY.lock().insert(port.path.clone(), port.clone());
        port
    }

    /// Remove the port at `path` from the registry.
    pub fn unregister(path: &str) {
        REGISTRY.lock().remove(path);
    }

    /// Look up a registered port.
    pub fn get(path: &str) -> Option<Self> {
        REGISTRY.lock().get(path).cloned()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Enqueue bytes to be returned by subsequent reads.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
        self.readable.notify_one();
    }

    /// Make the next `count` reads complete successfully with zero bytes.
    pub fn return_zero_reads(&self, count: usize) {
        self.state.lock().zero_reads += count;
        self.readable.notify_one();
    }

    /// Fail the next call of `op` with `fault`.
    pub fn fail_next(&self, op: MockOp, fault: MockFault) {
        self.state.lock().faults.insert(op, fault);
        if op == MockOp::Read {
            self.readable.notify_one();
        }
    }

    /// Echo every write back into the read queue.
    pub fn set_loopback(&self, loopback: bool) {
        self.state.lock().loopback = loopback;
    }

    /// Modem status reported by `get`.
    pub fn set_status(&self, status: PortStatus) {
        self.state.lock().status = status;
    }

    /// Simulate the device being removed: it disappears from listings and
    /// every pending or future I/O fails as disconnected.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
        self.readable.notify_one();
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Clear the write log.
    pub fn clear_write_log(&self) {
        self.state.lock().write_log.clear();
    }

    /// Control flags applied by the most recent `set`.
    pub fn last_set(&self) -> Option<SetOptions> {
        self.state.lock().last_set
    }

    /// Options the port was last opened with.
    pub fn open_options(&self) -> Option<OpenOptions> {
        self.state.lock().options.clone()
    }

    /// Current baud rate, if the port has been opened.
    pub fn baud_rate(&self) -> Option<u32> {
        self.state.lock().baud_rate
    }

    /// Whether a handle to this port is currently held.
    pub fn is_open(&self) -> bool {
        self.state.lock().handle_open
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }

    /// Number of reads that reached the handle layer.
    pub fn reads_started(&self) -> usize {
        self.state.lock().reads_started
    }

    /// Highest number of reads ever outstanding at the same time.
    pub fn max_reads_in_flight(&self) -> usize {
        self.state.lock().max_reads_in_flight
    }

    pub fn drain_count(&self) -> usize {
        self.state.lock().drain_count
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flush_count
    }

    /// Releases recorded so far, oldest first.
    pub fn teardown_log(&self) -> Vec<TeardownEvent> {
        self.state.lock().teardown.clone()
    }

    fn take_fault(&self, op: MockOp) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.unplugged && op != MockOp::Close {
            return Err(MockFault::Disconnect.into_error(&self.path));
        }
        match state.faults.remove(&op) {
            Some(fault) => Err(fault.into_error(&self.path)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MockPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPort")
            .field("path", &self.path)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

/// Open handle onto a [`MockPort`]. Dropping it releases the port.
#[derive(Debug)]
pub struct MockHandle {
    port: MockPort,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.port.state.lock();
        state.handle_open = false;
        state.teardown.push(TeardownEvent::HandleClosed);
    }
}

/// Readiness poller for a [`MockHandle`]; wakes a blocked read on release.
#[derive(Debug)]
pub struct MockPoller {
    port: MockPort,
}

impl Drop for MockPoller {
    fn drop(&mut self) {
        self.port.state.lock().teardown.push(TeardownEvent::PollerClosed);
        self.port.readable.notify_one();
    }
}

impl ReadinessPoller for MockPoller {}

/// Handle layer backed by the virtual port registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockLayer;

impl MockLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Decrements the in-flight read counter even if the read future is dropped.
struct InFlight<'a>(&'a MockPort);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state.lock().reads_in_flight -= 1;
    }
}

#[async_trait]
impl HandleLayer for MockLayer {
    type Handle = MockHandle;
    type Poller = MockPoller;

    async fn open(&self, path: &str, options: &OpenOptions) -> DeviceResult<MockHandle> {
        let port = MockPort::get(path).ok_or_else(|| DeviceError::not_found(path))?;
        port.take_fault(MockOp::Open)?;

        let mut state = port.state.lock();
        if state.handle_open && options.lock {
            return Err(DeviceError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path} is locked by another handle"),
            )));
        }
        state.handle_open = true;
        state.baud_rate = Some(options.baud_rate);
        state.options = Some(options.clone());
        drop(state);

        Ok(MockHandle { port })
    }

    fn poller(&self, handle: &MockHandle) -> DeviceResult<MockPoller> {
        Ok(MockPoller {
            port: handle.port.clone(),
        })
    }

    async fn close(&self, handle: MockHandle) -> DeviceResult<()> {
        let fault = handle.port.take_fault(MockOp::Close);
        drop(handle);
        fault
    }

    async fn read(
        &self,
        handle: &MockHandle,
        _poller: &MockPoller,
        buffer: &mut [u8],
    ) -> DeviceResult<usize> {
        let port = &handle.port;
        {
            let mut state = port.state.lock();
            state.reads_started += 1;
            state.reads_in_flight += 1;
            state.max_reads_in_flight = state.max_reads_in_flight.max(state.reads_in_flight);
        }
        let _in_flight = InFlight(port);

        loop {
            // Registered before checking so a wake-up between the check and
            // the await is not lost.
            let readable = port.readable.notified();
            port.take_fault(MockOp::Read)?;
            {
                let mut state = port.state.lock();
                if state.zero_reads > 0 {
                    state.zero_reads -= 1;
                    return Ok(0);
                }
                if !state.read_queue.is_empty() {
                    let count = buffer.len().min(state.read_queue.len());
                    for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..count)) {
                        *slot = byte;
                    }
                    return Ok(count);
                }
            }
            readable.await;
        }
    }

    async fn write(
        &self,
        handle: &MockHandle,
        _poller: &MockPoller,
        data: &[u8],
    ) -> DeviceResult<()> {
        let port = &handle.port;
        port.take_fault(MockOp::Write)?;
        let mut state = port.state.lock();
        state.write_log.push(data.to_vec());
        if state.loopback {
            state.read_queue.extend(data);
            drop(state);
            port.readable.notify_one();
        }
        Ok(())
    }

    async fn set(&self, handle: &MockHandle, options: &SetOptions) -> DeviceResult<()> {
        handle.port.take_fault(MockOp::Set)?;
        handle.port.state.lock().last_set = Some(*options);
        Ok(())
    }

    async fn get(&self, handle: &MockHandle) -> DeviceResult<PortStatus> {
        handle.port.take_fault(MockOp::Get)?;
        Ok(handle.port.state.lock().status)
    }

    async fn drain(&self, handle: &MockHandle) -> DeviceResult<()> {
        handle.port.take_fault(MockOp::Drain)?;
        handle.port.state.lock().drain_count += 1;
        Ok(())
    }

    async fn flush(&self, handle: &MockHandle) -> DeviceResult<()> {
        handle.port.take_fault(MockOp::Flush)?;
        let mut state = handle.port.state.lock();
        state.read_queue.clear();
        state.flush_count += 1;
        Ok(())
    }

    async fn update(&self, handle: &MockHandle, baud_rate: u32) -> DeviceResult<()> {
        handle.port.take_fault(MockOp::Update)?;
        handle.port.state.lock().baud_rate = Some(baud_rate);
        Ok(())
    }

    async fn list() -> DeviceResult<Vec<PortInfo>> {
        let registry = REGISTRY.lock();
        let mut ports: Vec<PortInfo> = registry
            .values()
            .filter_map(|port| {
                let state = port.state.lock();
                if state.unplugged {
                    None
                } else {
                    state.info.clone()
                }
            })
            .collect();
        ports.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ports)
    }
}
