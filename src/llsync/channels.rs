//! Link event channel.
//!
//! BLE stacks deliver writes, connection changes and timer expiries on
//! their own threads. An `embassy-sync` bounded channel hands them to the
//! single context that owns all LLSync state, without heap allocation.
//!
//! ```text
//! ┌──────────────┐  LinkEvent  ┌────────────────┐
//! │  BLE stack   │────────────▶│ LlsyncService  │
//! │  callbacks   │             │ (one context)  │
//! └──────────────┘             └────────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use super::slice::MAX_SLICE;

/// One callback from the transport or the timer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// ATT MTU negotiated by the stack.
    MtuChanged(u16),
    /// Bytes written to the characteristic with this 16-bit UUID.
    Write { uuid16: u16, data: Vec<u8, MAX_SLICE> },
    OtaTimerFired,
}

impl LinkEvent {
    /// Copy a GATT write; `None` if it exceeds one slice.
    pub fn write(uuid16: u16, data: &[u8]) -> Option<Self> {
        Some(Self::Write {
            uuid16,
            data: Vec::from_slice(data).ok()?,
        })
    }
}

/// Channel depth for link events.
pub const LINK_DEPTH: usize = 16;

pub type LinkEventChannel = Channel<CriticalSectionRawMutex, LinkEvent, LINK_DEPTH>;

/// Process-wide link event channel for targets with a single link.
pub static LINK_EVENTS: LinkEventChannel = Channel::new();
