//! Application core: the LLSync context object and its boundary.
//!
//! All interaction with the BLE stack, storage, flash and timers happens
//! through **port traits** defined in [`ports`], keeping the protocol
//! fully testable on the host.

pub mod events;
pub mod ports;
pub mod service;
