//! Port traits: the hexagonal boundary between the LLSync core and the host.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ LlsyncService (protocol core)
//! ```
//!
//! The BLE stack, persistent storage, raw flash, the OTA retry timer and the
//! product-specific policies are all reached through these traits. One
//! [`Platform`] implementation exists per target; the host simulation lives
//! in [`crate::adapters::sim`].
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD encrypt the `auth` namespace
//!   (device secret, bind PSK).
//! - **ConfigPort** implementations MUST validate before persisting.

use crate::config::LlsyncConfig;
use crate::llsync::ota::{FileInfo, OtaStopReason};

use super::events::LlsyncEvent;

// ───────────────────────────────────────────────────────────────
// GATT port (driven adapter: core → BLE stack)
// ───────────────────────────────────────────────────────────────

/// Outbound side of the BLE stack.
///
/// Inbound writes arrive through
/// [`LlsyncService::on_gatt_write`](super::service::LlsyncService::on_gatt_write);
/// this trait only covers what the core pushes out.
pub trait GattPort {
    /// Send one slice as a notification on the event characteristic.
    fn notify(&mut self, slice: &[u8]) -> Result<(), TransportError>;

    /// (Re)start advertising with the given manufacturer-specific payload.
    fn start_advertising(&mut self, manufacturer_data: &[u8]) -> Result<(), TransportError>;

    /// Stop advertising.
    fn stop_advertising(&mut self);

    /// Factory MAC of the BLE controller.
    fn mac_address(&self) -> [u8; 6];
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the bind record and credentials.
///
/// Write operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Loads and persists [`LlsyncConfig`].
pub trait ConfigPort {
    /// Returns [`LlsyncConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<LlsyncConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &LlsyncConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Flash port (driven adapter: OTA staging area)
// ───────────────────────────────────────────────────────────────

/// Raw page-granular flash used to stage the OTA image and the resume
/// record. Calls block until the operation completes.
pub trait FlashPort {
    /// Erase `len` bytes starting at a page-aligned `addr`.
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError>;

    /// Program `data` at `addr`. The range must have been erased.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError>;

    /// Read `buf.len()` bytes starting at `addr`.
    fn read_at(&self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Timer port (driven adapter: OTA retry timer)
// ───────────────────────────────────────────────────────────────

/// One-shot OTA retry timer. When it expires the host calls
/// [`LlsyncService::on_ota_timer`](super::service::LlsyncService::on_ota_timer).
pub trait OtaTimerPort {
    /// (Re)arm the timer; an armed timer is restarted.
    fn arm(&mut self, timeout_secs: u8) -> Result<(), TimerError>;

    /// Disarm the timer. Disarming an idle timer is a no-op.
    fn cancel(&mut self);
}

// ───────────────────────────────────────────────────────────────
// OTA policy port (product decisions)
// ───────────────────────────────────────────────────────────────

/// Product-specific OTA decisions and lifecycle hooks.
pub trait OtaPolicy {
    /// Decide whether a transfer may start (battery level, version policy).
    fn allow_ota(&mut self, file: &FileInfo) -> OtaVerdict;

    /// Final check of a CRC-valid image (size and version).
    fn validate_file(&mut self, file_size: u32, version: &str) -> bool;

    /// An accepted transfer is about to start.
    fn ota_started(&mut self, _file: &FileInfo) {}

    /// The session ended; `Success` means the host should reboot into the
    /// staged image after the advertised reboot timeout.
    fn ota_stopped(&mut self, reason: OtaStopReason);
}

/// Answer of [`OtaPolicy::allow_ota`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaVerdict {
    Allow,
    Deny(OtaDenyReason),
}

/// Reason code sent to the peer when an OTA request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaDenyReason {
    Disabled = 1,
    LowBattery = 2,
    LowVersion = 3,
    FileTooLarge = 4,
    Busy = 5,
}

// ───────────────────────────────────────────────────────────────
// Data template port (post-bind property/event/action layer)
// ───────────────────────────────────────────────────────────────

/// The declarative data-template layer. Payloads are the raw TLV bytes;
/// their interpretation belongs to the product.
pub trait DataTemplatePort {
    /// Peer acknowledged a property report.
    fn on_report_reply(&mut self, result: u8);

    /// Peer wrote properties. Returns the reply result code.
    fn on_control(&mut self, tlv: &[u8]) -> u8;

    /// Peer answered a status request with a result code and the full
    /// property TLV.
    fn on_get_status_reply(&mut self, result: u8, tlv: &[u8]);

    /// Peer invoked an action. Output TLV goes into `out`; returns the
    /// reply result code.
    fn on_action(&mut self, action_id: u8, tlv: &[u8], out: &mut heapless::Vec<u8, 256>) -> u8;

    /// Peer acknowledged an event post.
    fn on_event_reply(&mut self, event_id: u8, result: u8);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`LlsyncEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &LlsyncEvent);
}

// ───────────────────────────────────────────────────────────────
// Platform bundle
// ───────────────────────────────────────────────────────────────

/// Everything the core needs from one target, injected at construction.
pub trait Platform:
    GattPort + StoragePort + FlashPort + OtaTimerPort + OtaPolicy + DataTemplatePort + EventSink
{
}

impl<T> Platform for T where
    T: GattPort + StoragePort + FlashPort + OtaTimerPort + OtaPolicy + DataTemplatePort + EventSink
{
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] and [`FlashPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Address range outside the device.
    OutOfRange,
    /// Generic I/O error.
    IoError,
    /// Stored blob could not be decoded.
    Corrupted,
}

/// Errors from [`GattPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No central is connected.
    NotConnected,
    /// The stack refused the notification (queue full, link lost).
    SendFailed,
}

/// Errors from [`OtaTimerPort::arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The host could not create or start the timer.
    Unavailable,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::OutOfRange => write!(f, "address out of range"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored record corrupted"),
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no central connected"),
            Self::SendFailed => write!(f, "notification send failed"),
        }
    }
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "timer unavailable"),
        }
    }
}
