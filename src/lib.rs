//! LLSync BLE device core.
//!
//! Message slicing, the binding and connection handshake, dynamic
//! registration and resumable OTA for devices paired with the LLSync
//! companion app. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod llsync;

mod error;

pub use error::{Error, Result};
