//! Utility functions for hardware testing.

use serial_bindings::{NativeBinding, OpenOptions};
use std::env;

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub loopback_enabled: bool,
}

impl TestPortConfig {
    /// Get test configuration from environment variables.
    pub fn from_env() -> Option<Self> {
        let port_name = env::var("TEST_PORT").ok()?;
        let baud_rate = env::var("TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9600);
        let loopback_enabled = env::var("TEST_LOOPBACK").ok().as_deref() == Some("1");

        Some(TestPortConfig {
            port_name,
            baud_rate,
            loopback_enabled,
        })
    }

    /// Open options for the test device.
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            baud_rate: self.baud_rate,
            lock: true,
            ..Default::default()
        }
    }
}

/// Skip test if hardware is not available.
pub fn skip_without_hardware() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("Skipping hardware test: TEST_PORT not set");
    }
    config
}

/// Open the configured test port on a native binding.
pub async fn open_test_port(config: &TestPortConfig) -> NativeBinding {
    let binding = NativeBinding::native(|signal| {
        println!("device disconnected: {} ({})", signal.path, signal.reason);
    });
    binding
        .open(&config.port_name, config.open_options())
        .expect("valid open arguments")
        .await
        .expect("failed to open test port");
    binding
}
