//! Push adapter behaviour: single outstanding read, zero-byte retry,
//! exact chunking, error routing and backpressure.

mod common;

use bytes::{Bytes, BytesMut};
use common::{open_mock, within};
use futures::stream::FusedStream;
use futures::StreamExt;
use mockall::{mock, Sequence};
use pretty_assertions::assert_eq;
use serial_bindings::{
    BindingError, BindingResult, Flow, Halt, PushSink, PushSource, ReadCapability, ReadFuture,
    ReadOutcome, StreamSlot,
};
use std::time::Duration;
use tokio_test::{assert_pending, task};

mock! {
    pub Reader {}

    impl ReadCapability for Reader {
        fn read(&self, buffer: BytesMut, offset: usize, length: usize) -> BindingResult<ReadFuture>;
    }
}

/// Sink that records everything it is handed.
struct RecordingSink {
    chunks: Vec<Bytes>,
    errors: Vec<BindingError>,
    flow: Flow,
}

impl RecordingSink {
    fn new(flow: Flow) -> Self {
        Self {
            chunks: Vec::new(),
            errors: Vec::new(),
            flow,
        }
    }
}

impl PushSink for RecordingSink {
    fn push(&mut self, chunk: Bytes) -> Flow {
        self.chunks.push(chunk);
        self.flow
    }

    fn push_error(&mut self, err: BindingError) {
        self.errors.push(err);
    }
}

fn completes_with(
    data: &'static [u8],
) -> impl FnMut(BytesMut, usize, usize) -> BindingResult<ReadFuture> + Send + 'static {
    move |mut buffer: BytesMut, offset: usize, _length: usize| -> BindingResult<ReadFuture> {
        buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(Box::pin(async move {
            Ok(ReadOutcome {
                bytes_read: data.len(),
                buffer,
            })
        }))
    }
}

fn never_completes(_: BytesMut, _: usize, _: usize) -> BindingResult<ReadFuture> {
    Ok(Box::pin(
        futures::future::pending::<BindingResult<ReadOutcome>>(),
    ))
}

#[tokio::test]
async fn test_only_one_read_in_flight() {
    let mut reader = MockReader::new();
    reader
        .expect_read()
        .withf(|buffer, offset, length| buffer.len() == 5 && *offset == 0 && *length == 5)
        .times(1)
        .returning(never_completes);

    let mut source = PushSource::new(reader, RecordingSink::new(Flow::Continue));
    source.read(5);
    source.read(5);
    source.read(64);
    assert!(source.is_pending());

    {
        let mut pump = task::spawn(source.pump());
        assert_pending!(pump.poll());
        assert_pending!(pump.poll());
    }
    assert!(source.sink().chunks.is_empty());
}

#[tokio::test]
async fn test_data_pushed_as_one_exact_chunk() {
    let mut reader = MockReader::new();
    let mut seq = Sequence::new();
    reader
        .expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(completes_with(b"hello"));
    reader
        .expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(never_completes);

    let mut source = PushSource::builder()
        .binding(reader)
        .sink(RecordingSink::new(Flow::Continue))
        .read_size(32)
        .build()
        .unwrap();

    {
        let mut pump = task::spawn(source.pump());
        assert_pending!(pump.poll());
    }
    assert_eq!(source.sink().chunks, vec![Bytes::from_static(b"hello")]);
    assert!(source.is_pending());
}

#[tokio::test]
async fn test_zero_bytes_retried_without_push() {
    let mut reader = MockReader::new();
    let mut seq = Sequence::new();
    reader
        .expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(completes_with(b""));
    reader
        .expect_read()
        .withf(|_, _, length| *length == 8)
        .times(1)
        .in_sequence(&mut seq)
        .returning(completes_with(b"late"));

    let mut source = PushSource::builder()
        .binding(reader)
        .sink(RecordingSink::new(Flow::Pause))
        .retry_interval(Duration::from_millis(1))
        .build()
        .unwrap();

    source.read(8);
    assert_eq!(within(source.pump()).await, Halt::Paused);
    assert_eq!(source.sink().chunks, vec![Bytes::from_static(b"late")]);
    assert!(source.sink().errors.is_empty());
}

#[tokio::test]
async fn test_error_goes_to_sink_without_push() {
    let mut reader = MockReader::new();
    reader.expect_read().times(1).returning(|_, _, _| {
        Ok(Box::pin(async { Err(BindingError::PortNotOpen) }))
    });

    let mut source = PushSource::new(reader, RecordingSink::new(Flow::Continue));
    assert_eq!(source.pump().await, Halt::Failed);

    let sink = source.sink();
    assert!(sink.chunks.is_empty());
    assert_eq!(sink.errors.len(), 1);
    assert!(matches!(sink.errors[0], BindingError::PortNotOpen));
    assert!(!source.is_pending());
}

#[tokio::test]
async fn test_synchronous_rejection_reported() {
    let mut reader = MockReader::new();
    reader
        .expect_read()
        .times(1)
        .returning(|_, _, _| Err(BindingError::invalid_argument("buffer is too small")));

    let mut source = PushSource::new(reader, RecordingSink::new(Flow::Continue));
    source.read(4);

    assert!(!source.is_pending());
    assert!(matches!(
        source.sink().errors.as_slice(),
        [BindingError::InvalidArgument(_)]
    ));
}

#[tokio::test]
async fn test_pause_stops_reads_until_resumed() {
    let mut reader = MockReader::new();
    reader
        .expect_read()
        .times(2)
        .returning(completes_with(b"x"));

    let mut source = PushSource::new(reader, RecordingSink::new(Flow::Pause));
    assert_eq!(source.pump().await, Halt::Paused);
    assert_eq!(source.pump().await, Halt::Paused);
    assert_eq!(source.sink().chunks.len(), 1);
    assert!(source.is_paused());

    source.resume();
    assert_eq!(source.pump().await, Halt::Paused);
    assert_eq!(source.sink().chunks.len(), 2);
}

#[test]
fn test_builder_requires_binding() {
    let err = PushSource::<MockReader, RecordingSink>::builder()
        .sink(RecordingSink::new(Flow::Continue))
        .build()
        .unwrap_err();
    assert!(matches!(err, BindingError::InvalidArgument(msg) if msg.contains("binding")));
}

#[test]
fn test_builder_requires_sink() {
    let err = PushSource::<MockReader, RecordingSink>::builder()
        .binding(MockReader::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, BindingError::InvalidArgument(msg) if msg.contains("sink")));
}

#[tokio::test]
async fn test_closure_sink_uses_default_error_handler() {
    let mut reader = MockReader::new();
    reader.expect_read().times(1).returning(|_, _, _| {
        Ok(Box::pin(async { Err(BindingError::PortNotOpen) }))
    });

    let mut pushed = 0;
    let mut source = PushSource::new(reader, |_chunk: Bytes| {
        pushed += 1;
        Flow::Continue
    });
    assert_eq!(source.pump().await, Halt::Failed);
    drop(source);
    assert_eq!(pushed, 0);
}

#[tokio::test]
async fn test_stream_over_virtual_port() {
    let (port, binding, _) = open_mock("STREAM", 9600).await;
    port.return_zero_reads(2);
    port.enqueue_read(b"data");

    let mut stream = PushSource::builder()
        .binding(binding)
        .sink(StreamSlot::default())
        .retry_interval(Duration::from_millis(1))
        .build()
        .unwrap();

    let chunk = within(stream.next()).await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"data");
    assert_eq!(port.reads_started(), 3);
    assert_eq!(port.max_reads_in_flight(), 1);
}

#[tokio::test]
async fn test_stream_reports_disconnect() {
    let (port, binding, recorder) = open_mock("STRMGONE", 9600).await;
    let mut stream = PushSource::stream(binding);

    port.unplug();
    let item = within(stream.next()).await.unwrap();
    assert!(item.is_err_and(|err| err.is_disconnect()));
    assert_eq!(recorder.signals().len(), 1);
}

#[tokio::test]
async fn test_size_hint_capped_at_read_size() {
    let mut reader = MockReader::new();
    reader
        .expect_read()
        .withf(|buffer, offset, length| buffer.len() == 32 && *offset == 0 && *length == 32)
        .times(1)
        .returning(never_completes);

    let mut source = PushSource::builder()
        .binding(reader)
        .sink(RecordingSink::new(Flow::Continue))
        .read_size(32)
        .build()
        .unwrap();
    source.read(usize::MAX);
    assert!(source.is_pending());
}

#[tokio::test]
async fn test_close_while_stream_holds_pending_read() {
    let (port, binding, _) = open_mock("STRMCLOSE", 9600).await;
    let mut stream = PushSource::stream(binding.clone());

    let idle = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
    assert!(idle.is_err());
    assert_eq!(port.reads_started(), 1);

    within(binding.close().unwrap()).await.unwrap();
    assert!(!binding.is_open());

    let item = within(stream.next()).await;
    assert!(matches!(item, Some(Err(BindingError::PortNotOpen))));
    assert!(!port.is_open());

    assert!(within(stream.next()).await.is_none());
    assert!(stream.is_terminated());
    assert_eq!(port.reads_started(), 1);
}

#[tokio::test]
async fn test_stream_ends_once_port_closed() {
    let (_port, binding, _) = open_mock("STRMEND", 9600).await;
    binding.close().unwrap().await.unwrap();

    let mut stream = PushSource::stream(binding);
    assert!(matches!(
        stream.next().await,
        Some(Err(BindingError::PortNotOpen))
    ));
    for _ in 0..3 {
        assert!(stream.next().await.is_none());
    }
}
