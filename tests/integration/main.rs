//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below drives [`llsync::app::service::LlsyncService`] over the
//! simulated platform the way a companion app would: sliced GATT writes in,
//! reassembled notifications out. All tests run on the host with no radio.

#![cfg(not(target_os = "espidf"))]

mod data_template_tests;
mod dynreg_tests;
mod framing_tests;
mod harness;
mod ota_flow_tests;
