//! Tests against a real serial device.
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0          # or COM3 on Windows
//! export TEST_BAUD=115200                # optional, default: 9600
//! export TEST_LOOPBACK=1                 # if TX and RX are wired together
//! cargo test --features hardware-tests -- --ignored
//! ```

use super::utils::{open_test_port, skip_without_hardware};
use crate::common::within;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serial_bindings::{BindingError, NativeBinding, PushSource, SetOptions};

#[tokio::test]
#[ignore]
async fn test_list_includes_test_port() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let ports = NativeBinding::list().unwrap().await.unwrap();
    assert!(
        ports.iter().any(|p| p.path == config.port_name),
        "{} not listed in {:?}",
        config.port_name,
        ports
    );
}

#[tokio::test]
#[ignore]
async fn test_real_port_open_close() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let binding = open_test_port(&config).await;
    assert!(binding.is_open());

    let again = binding
        .open(&config.port_name, config.open_options())
        .unwrap()
        .await;
    assert!(matches!(again, Err(BindingError::AlreadyOpen)));

    binding.close().unwrap().await.unwrap();
    assert!(!binding.is_open());
}

#[tokio::test]
#[ignore]
async fn test_real_port_control_lines() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let binding = open_test_port(&config).await;

    binding.set(SetOptions::default()).unwrap().await.unwrap();
    let status = binding.get().unwrap().await.unwrap();
    println!("modem status: {status:?}");

    binding.flush().unwrap().await.unwrap();
    binding.update(config.baud_rate).unwrap().await.unwrap();
    binding.close().unwrap().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_real_port_loopback() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    if !config.loopback_enabled {
        println!("Skipping loopback test: TEST_LOOPBACK not set");
        return;
    }
    let binding = open_test_port(&config).await;
    binding.flush().unwrap().await.unwrap();

    binding
        .write(Bytes::from_static(b"loopback\r\n"))
        .unwrap()
        .await
        .unwrap();
    binding.drain().unwrap().await.unwrap();

    let mut received = BytesMut::new();
    let mut stream = PushSource::stream(binding.clone());
    while received.len() < 10 {
        let chunk = within(stream.next()).await.unwrap().unwrap();
        received.extend_from_slice(&chunk);
    }
    assert_eq!(&received[..], b"loopback\r\n");

    drop(stream);
    binding.close().unwrap().await.unwrap();
}
