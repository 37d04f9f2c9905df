//! Push-style streaming over a pull-based read primitive.
//!
//! A [`PushSource`] borrows a read-capable binding and turns completed reads
//! into chunks handed to a [`PushSink`]. At most one read is outstanding at a
//! time, whoever asks for more data and however often.
//!
//! Read results are handled three ways:
//!
//! * an error goes to [`PushSink::push_error`] and nothing is pushed;
//! * zero bytes is not end of stream: nothing is pushed and the read is
//!   retried after the configured retry interval;
//! * `N > 0` bytes is pushed as exactly one chunk of exactly `N` bytes.
//!
//! The sink applies backpressure by answering [`Flow::Pause`]; no further
//! read is issued until [`PushSource::resume`] or [`PushSource::read`].
//!
//! With the [`StreamSlot`] sink a source is a [`futures::Stream`] that only
//! reads while the consumer polls:
//!
//! ```no_run
//! use futures::StreamExt;
//! use serial_bindings::{NativeBinding, OpenOptions, PushSource};
//!
//! # async fn demo() -> serial_bindings::BindingResult<()> {
//! let binding = NativeBinding::native(|_| {});
//! binding.open("/dev/ttyUSB0", OpenOptions::new(9600))?.await?;
//!
//! let mut chunks = PushSource::stream(binding.clone());
//! while let Some(chunk) = chunks.next().await {
//!     println!("{:?}", chunk?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::binding::{Binding, ReadFuture};
use crate::config::StreamConfig;
use crate::error::{BindingError, BindingResult};
use crate::native::HandleLayer;
use bytes::{Bytes, BytesMut};
use futures::stream::FusedStream;
use futures::{ready, Stream};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, Sleep};
use tracing::{debug, trace, warn};

/// Default number of bytes requested per read.
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Default delay before retrying a read that returned no data.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Anything that can start a read into a caller-supplied buffer.
///
/// A completed read that reports zero bytes means "nothing yet, try again".
pub trait ReadCapability: Send + Sync + 'static {
    fn read(&self, buffer: BytesMut, offset: usize, length: usize) -> BindingResult<ReadFuture>;
}

impl<L: HandleLayer> ReadCapability for Binding<L> {
    fn read(&self, buffer: BytesMut, offset: usize, length: usize) -> BindingResult<ReadFuture> {
        Binding::read(self, buffer, offset, length)
    }
}

/// Answer from a sink after accepting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Stop issuing reads until resumed.
    Pause,
}

/// Why [`PushSource::poll_pump`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// The sink asked for a pause.
    Paused,
    /// A read failed; the error went to the sink.
    Failed,
}

/// Downstream consumer of pushed chunks.
pub trait PushSink: Send {
    /// Accept one chunk.
    fn push(&mut self, chunk: Bytes) -> Flow;

    /// Receive a read failure. The default only logs it.
    fn push_error(&mut self, err: BindingError) {
        warn!(error = %err, "read failed");
    }
}

impl<F> PushSink for F
where
    F: FnMut(Bytes) -> Flow + Send,
{
    fn push(&mut self, chunk: Bytes) -> Flow {
        self(chunk)
    }
}

struct PendingRead {
    length: usize,
    future: ReadFuture,
}

struct Retry {
    length: usize,
    delay: Pin<Box<Sleep>>,
}

/// Drives reads on a binding and pushes the results into a sink.
pub struct PushSource<R: ReadCapability, S: PushSink> {
    binding: R,
    sink: S,
    pending: Option<PendingRead>,
    retry: Option<Retry>,
    paused: bool,
    pool: BytesMut,
    read_size: usize,
    retry_interval: Duration,
}

impl<R: ReadCapability, S: PushSink> std::fmt::Debug for PushSource<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSource")
            .field("pending", &self.pending.as_ref().map(|p| p.length))
            .field("retrying", &self.retry.is_some())
            .field("paused", &self.paused)
            .field("read_size", &self.read_size)
            .finish()
    }
}

impl<R: ReadCapability, S: PushSink> PushSource<R, S> {
    /// Source with default tuning.
    pub fn new(binding: R, sink: S) -> Self {
        Self {
            binding,
            sink,
            pending: None,
            retry: None,
            paused: false,
            pool: BytesMut::new(),
            read_size: DEFAULT_READ_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn builder() -> PushSourceBuilder<R, S> {
        PushSourceBuilder::new()
    }

    /// Request data.
    ///
    /// Clears a pause. Does nothing while a read is already pending; otherwise
    /// starts a read of `size_hint` bytes capped at the configured read size,
    /// or of the full read size when the hint is zero.
    pub fn read(&mut self, size_hint: usize) {
        self.resume();
        if self.pending.is_some() {
            trace!("read already pending");
            return;
        }
        self.retry = None;
        let length = match size_hint {
            0 => self.read_size,
            hint => hint.min(self.read_size),
        };
        self.start_read(length);
    }

    /// Clear a pause requested by the sink.
    pub fn resume(&mut self) {
        if mem::take(&mut self.paused) {
            debug!("push source resumed");
        }
    }

    /// Whether a read is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn binding(&self) -> &R {
        &self.binding
    }

    /// Drive reads until the sink pauses or a read fails.
    pub async fn pump(&mut self) -> Halt {
        std::future::poll_fn(|cx| self.poll_pump(cx)).await
    }

    /// Poll-based form of [`pump`](Self::pump).
    pub fn poll_pump(&mut self, cx: &mut Context<'_>) -> Poll<Halt> {
        loop {
            if self.paused {
                return Poll::Ready(Halt::Paused);
            }

            if let Some(retry) = self.retry.as_mut() {
                ready!(retry.delay.as_mut().poll(cx));
                let length = retry.length;
                self.retry = None;
                trace!(length, "retrying read");
                self.start_read(length);
            } else if self.pending.is_none() {
                self.start_read(self.read_size);
            }

            let Some(pending) = self.pending.as_mut() else {
                // The read was rejected before it started.
                return Poll::Ready(Halt::Failed);
            };
            let result = ready!(pending.future.as_mut().poll(cx));
            let length = pending.length;
            self.pending = None;

            match result {
                Err(err) => {
                    self.sink.push_error(err);
                    return Poll::Ready(Halt::Failed);
                }
                Ok(outcome) if outcome.bytes_read == 0 => {
                    self.reclaim(outcome.buffer);
                    trace!(length, "read returned no data");
                    self.retry = Some(Retry {
                        length,
                        delay: Box::pin(sleep(self.retry_interval)),
                    });
                }
                Ok(outcome) => {
                    let mut buffer = outcome.buffer;
                    let chunk = buffer.split_to(outcome.bytes_read).freeze();
                    self.reclaim(buffer);
                    if self.sink.push(chunk) == Flow::Pause {
                        debug!("push source paused by sink");
                        self.paused = true;
                    }
                }
            }
        }
    }

    fn start_read(&mut self, length: usize) {
        if self.pool.len() < length {
            self.pool = BytesMut::zeroed(length.max(self.read_size));
        }
        let buffer = self.pool.split_to(length);
        match self.binding.read(buffer, 0, length) {
            Ok(future) => self.pending = Some(PendingRead { length, future }),
            Err(err) => self.sink.push_error(err),
        }
    }

    /// Return the unused tail of a read buffer to the pool.
    fn reclaim(&mut self, mut buffer: BytesMut) {
        if buffer.is_empty() {
            return;
        }
        buffer.unsplit(mem::take(&mut self.pool));
        self.pool = buffer;
    }
}

impl<R: ReadCapability> PushSource<R, StreamSlot> {
    /// A source that yields chunks as a [`Stream`].
    pub fn stream(binding: R) -> Self {
        Self::new(binding, StreamSlot::default())
    }
}

/// Builder for [`PushSource`].
pub struct PushSourceBuilder<R, S> {
    binding: Option<R>,
    sink: Option<S>,
    read_size: usize,
    retry_interval: Duration,
}

impl<R: ReadCapability, S: PushSink> Default for PushSourceBuilder<R, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ReadCapability, S: PushSink> PushSourceBuilder<R, S> {
    pub fn new() -> Self {
        Self {
            binding: None,
            sink: None,
            read_size: DEFAULT_READ_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn binding(mut self, binding: R) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Bytes requested by reads the source starts on its own.
    pub fn read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size;
        self
    }

    /// Delay before retrying a read that returned no data.
    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Take read size and retry interval from configuration.
    pub fn config(self, config: &StreamConfig) -> Self {
        self.read_size(config.read_size)
            .retry_interval(config.retry_interval())
    }

    pub fn build(self) -> BindingResult<PushSource<R, S>> {
        let binding = self
            .binding
            .ok_or_else(|| BindingError::invalid_argument("\"binding\" is required"))?;
        let sink = self
            .sink
            .ok_or_else(|| BindingError::invalid_argument("\"sink\" is required"))?;
        if self.read_size == 0 {
            return Err(BindingError::invalid_argument(
                "\"read_size\" must be greater than zero",
            ));
        }

        let mut source = PushSource::new(binding, sink);
        source.read_size = self.read_size;
        source.retry_interval = self.retry_interval;
        Ok(source)
    }
}

/// Single-item sink backing the [`Stream`] implementation.
///
/// Holds at most one chunk or error and pauses the source after every push.
#[derive(Debug, Default)]
pub struct StreamSlot {
    item: Option<BindingResult<Bytes>>,
    finished: bool,
}

impl PushSink for StreamSlot {
    fn push(&mut self, chunk: Bytes) -> Flow {
        self.item = Some(Ok(chunk));
        Flow::Pause
    }

    fn push_error(&mut self, err: BindingError) {
        self.item = Some(Err(err));
    }
}

/// Zero-byte reads are retried and device errors are yielded as items. The
/// stream ends after yielding `PortNotOpen`, once the binding is closed.
impl<R: ReadCapability + Unpin> Stream for PushSource<R, StreamSlot> {
    type Item = BindingResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.sink.finished {
            return Poll::Ready(None);
        }
        loop {
            if let Some(item) = this.sink.item.take() {
                if matches!(item, Err(BindingError::PortNotOpen)) {
                    debug!("port closed; stream finished");
                    this.sink.finished = true;
                }
                return Poll::Ready(Some(item));
            }
            this.paused = false;
            ready!(this.poll_pump(cx));
        }
    }
}

impl<R: ReadCapability + Unpin> FusedStream for PushSource<R, StreamSlot> {
    fn is_terminated(&self) -> bool {
        self.sink.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{MockLayer, MockPort};
    use crate::options::OpenOptions;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    async fn open(path: &str) -> (MockPort, Binding<MockLayer>) {
        let port = MockPort::register(path);
        let binding = Binding::new(MockLayer, |_| {});
        binding
            .open(path, OpenOptions::new(9600))
            .unwrap()
            .await
            .unwrap();
        (port, binding)
    }

    #[tokio::test]
    async fn test_stream_yields_chunks() {
        let (port, binding) = open("/dev/ttySTREAM0").await;
        port.enqueue_read(b"hello");

        let mut source = PushSource::stream(binding);
        let chunk = source.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(!source.is_pending());
    }

    #[tokio::test]
    async fn test_closure_sink_pauses() {
        let (port, binding) = open("/dev/ttySTREAM1").await;
        port.enqueue_read(b"abc");

        let mut received = Vec::new();
        let mut source = PushSource::new(binding, |chunk: Bytes| {
            received.push(chunk);
            Flow::Pause
        });
        assert_eq!(source.pump().await, Halt::Paused);
        assert!(source.is_paused());
        drop(source);

        assert_eq!(received, vec![Bytes::from_static(b"abc")]);
    }

    #[tokio::test]
    async fn test_pool_reuses_unread_tail() {
        let (port, binding) = open("/dev/ttySTREAM2").await;
        port.enqueue_read(b"xy");

        let mut source = PushSource::builder()
            .binding(binding)
            .sink(StreamSlot::default())
            .read_size(16)
            .build()
            .unwrap();
        let chunk = source.next().await.unwrap().unwrap();
        assert_eq!(chunk.len(), 2);
        assert_eq!(source.pool.len(), 14);
    }

    #[test]
    fn test_builder_rejects_zero_read_size() {
        let binding = Binding::new(MockLayer, |_| {});
        let err = PushSource::builder()
            .binding(binding)
            .sink(StreamSlot::default())
            .read_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidArgument(_)));
    }
}
