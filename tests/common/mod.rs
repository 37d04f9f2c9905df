//! Shared test utilities.
//!
//! Virtual ports live in a process-wide registry, so every test registers its
//! own uniquely named path.

#![allow(dead_code)]

use parking_lot::Mutex;
use serial_bindings::{Binding, DisconnectSignal, MockLayer, MockPort, OpenOptions};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_PORT: AtomicUsize = AtomicUsize::new(0);

/// A fresh virtual port path, unique within the test binary.
pub fn unique_path(prefix: &str) -> String {
    format!(
        "/dev/tty{}{}",
        prefix,
        NEXT_PORT.fetch_add(1, Ordering::SeqCst)
    )
}

/// Collects every disconnect signal delivered to a binding.
#[derive(Clone, Default)]
pub struct DisconnectRecorder {
    signals: Arc<Mutex<Vec<DisconnectSignal>>>,
}

impl DisconnectRecorder {
    pub fn callback(&self) -> impl Fn(DisconnectSignal) + Send + Sync + 'static {
        let signals = Arc::clone(&self.signals);
        move |signal| signals.lock().push(signal)
    }

    pub fn signals(&self) -> Vec<DisconnectSignal> {
        self.signals.lock().clone()
    }
}

/// A binding over the mock layer with a recording disconnect callback.
pub fn mock_binding() -> (Binding<MockLayer>, DisconnectRecorder) {
    let recorder = DisconnectRecorder::default();
    let binding = Binding::new(MockLayer, recorder.callback());
    (binding, recorder)
}

/// Register a virtual port and open it at `baud_rate`.
pub async fn open_mock(
    prefix: &str,
    baud_rate: u32,
) -> (MockPort, Binding<MockLayer>, DisconnectRecorder) {
    let path = unique_path(prefix);
    let port = MockPort::register(path.as_str());
    let (binding, recorder) = mock_binding();
    binding
        .open(&path, OpenOptions::new(baud_rate))
        .expect("valid open arguments")
        .await
        .expect("virtual port opens");
    (port, binding, recorder)
}

/// Fail the test instead of hanging if `future` never completes.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation timed out")
}
