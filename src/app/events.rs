//! Outbound LLSync events.
//!
//! The core emits these through the [`EventSink`](super::ports::EventSink)
//! port. Adapters on the other side decide what to do with them: log to
//! serial, drive a status LED, prompt the user for a secure-bind decision.

use crate::llsync::identity::BindState;
use crate::llsync::ota::OtaStopReason;

/// Structured events emitted by the LLSync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlsyncEvent {
    /// The service started with this persisted bind state.
    Started(BindState),

    /// A central connected at the BLE level.
    Connected,

    /// The central disconnected; all transient state was reset.
    Disconnected,

    /// The bind state changed.
    BindStateChanged { from: BindState, to: BindState },

    /// Secure bind: the user must confirm within `wait_secs`.
    BindConfirmRequested { wait_secs: u16 },

    /// The link passed authentication; data and OTA are now allowed.
    LinkAuthenticated,

    /// The per-notification payload size changed.
    MtuChanged(u16),

    /// Dynamic registration stored a new device secret.
    SecretProvisioned,

    /// An OTA transfer was accepted.
    OtaStarted { size: u32, resume_from: u32 },

    /// A transfer loop completed.
    OtaProgress { received: u32, size: u32 },

    /// The OTA session ended.
    OtaStopped(OtaStopReason),
}
