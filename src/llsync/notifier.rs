//! Uplink notifier.
//!
//! Every outbound message passes through [`Notifier::send`], which applies
//! the pre-authentication gate and hands the message to the framer at the
//! current MTU.

use heapless::Vec;
use log::{debug, warn};

use super::msg::{PROTOCOL_VERSION, UplinkType, uplink_header_len};
use super::slice::{FrameError, MAX_SLICE, encode_slices};
use crate::app::ports::{GattPort, TransportError};
use crate::config::{DEVICE_NAME_MAX, LlsyncConfig, MIN_MTU};
use crate::error::{Error, Result};

const MTU_REPORT_MAX: usize = DEVICE_NAME_MAX + 4;

/// Transient link state, reset on every disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub ble_connected: bool,
    pub llsync_connected: bool,
}

pub struct Notifier {
    conn: ConnectionState,
    mtu: u16,
    default_mtu: u16,
}

impl Notifier {
    pub fn new(default_mtu: u16) -> Self {
        Self {
            conn: ConnectionState::default(),
            mtu: default_mtu,
            default_mtu,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.conn
    }

    pub fn is_authenticated(&self) -> bool {
        self.conn.llsync_connected
    }

    /// Per-notification payload size.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Import a negotiated MTU; 0 or anything below the ATT minimum falls
    /// back to the configured default. Returns the value in effect.
    pub fn set_mtu(&mut self, mtu: u16) -> u16 {
        self.mtu = if mtu < MIN_MTU {
            warn!("notifier: MTU {mtu} unusable, using {}", self.default_mtu);
            self.default_mtu
        } else {
            mtu.min(MAX_SLICE as u16)
        };
        self.mtu
    }

    pub fn on_connect(&mut self) {
        self.conn = ConnectionState {
            ble_connected: true,
            llsync_connected: false,
        };
        self.mtu = self.default_mtu;
    }

    pub fn on_disconnect(&mut self) {
        self.conn = ConnectionState::default();
        self.mtu = self.default_mtu;
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.conn.llsync_connected = authenticated;
    }

    /// Slice and send one message. `id` only matters for event posts and
    /// action replies.
    pub fn send<G: GattPort>(
        &self,
        gatt: &mut G,
        ty: UplinkType,
        id: u8,
        header: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        if !self.conn.llsync_connected && !ty.allowed_before_auth() {
            warn!("notifier: {ty:?} refused before authentication");
            return Err(Error::NotAuthenticated);
        }
        if !self.conn.ble_connected {
            return Err(TransportError::NotConnected.into());
        }
        if header.len() != uplink_header_len(ty) {
            return Err(FrameError::BadHeader.into());
        }
        let slices = encode_slices(self.mtu, ty.type_byte(id), header, payload, |s| {
            gatt.notify(s)
        })
        .map_err(|e| match e {
            FrameError::Send(t) => Error::Transport(t),
            other => Error::Frame(other),
        })?;
        debug!("notifier: {ty:?} {} bytes in {slices} slice(s)", payload.len());
        Ok(())
    }
}

/// `ReportMtu` payload: `version | mtu u16 BE (bit 15 = remote may set) |
/// name_len | name`.
pub fn mtu_report(cfg: &LlsyncConfig, mtu: u16) -> Vec<u8, MTU_REPORT_MAX> {
    let mut word = mtu & 0x7FFF;
    if cfg.remote_may_set_mtu {
        word |= 0x8000;
    }
    let name = cfg.device_name.as_bytes();
    let mut out = Vec::new();
    // capacity covers the longest device name
    let _ = out.push(PROTOCOL_VERSION);
    let _ = out.extend_from_slice(&word.to_be_bytes());
    let _ = out.push(name.len() as u8);
    let _ = out.extend_from_slice(name);
    out
}
