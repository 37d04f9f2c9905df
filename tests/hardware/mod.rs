//! Hardware-specific tests requiring real serial devices.
//!
//! These tests are ignored by default and need `TEST_PORT` (and optionally
//! `TEST_BAUD`, `TEST_LOOPBACK`) set.

pub mod real_port_tests;
pub mod utils;
