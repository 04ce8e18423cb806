//! Advertising payload.
//!
//! ```text
//! ┌────────────────┬───────────┬─────────────────────────────────────────┐
//! │ company id (LE)│ state (1B)│ bound:   md5 fold (8B) | identify (8B)  │
//! │                │           │ unbound: MAC (6B)      | product id (10B)│
//! └────────────────┴───────────┴─────────────────────────────────────────┘
//! ```
//!
//! The state byte carries the bind state in bits 0-1, the
//! "registration pending" flag in bit 2 and the protocol version in
//! bits 5-7.

use heapless::Vec;
use md5::{Digest, Md5};

use super::identity::{BindState, CoreData};
use super::msg::PROTOCOL_VERSION;
use crate::config::LlsyncConfig;

pub const COMPANY_ID: u16 = 0xFEE7;

/// State-byte flag: device waits for dynamic registration.
pub const DYNREG_PENDING: u8 = 0x04;

/// Company id, state byte and 16 bytes of identity.
pub const ADV_DATA_LEN: usize = 19;

/// MD5 of `product_id ‖ device_name`, folded to 8 bytes by XOR-ing the
/// two halves.
pub fn identity_digest(cfg: &LlsyncConfig) -> [u8; 8] {
    let mut h = Md5::new();
    h.update(cfg.product_id.as_bytes());
    h.update(cfg.device_name.as_bytes());
    let d = h.finalize();
    let mut out = [0u8; 8];
    for (i, b) in out.iter_mut().enumerate() {
        *b = d[i] ^ d[i + 8];
    }
    out
}

/// Manufacturer-specific data for the current bind state.
pub fn manufacturer_data(
    cfg: &LlsyncConfig,
    core: &CoreData,
    mac: [u8; 6],
    dynreg_pending: bool,
) -> Vec<u8, ADV_DATA_LEN> {
    let mut state = (core.bind_state as u8) | (PROTOCOL_VERSION << 5);
    if dynreg_pending {
        state |= DYNREG_PENDING;
    }

    let mut buf = [0u8; ADV_DATA_LEN];
    buf[..2].copy_from_slice(&COMPANY_ID.to_le_bytes());
    buf[2] = state;
    if core.bind_state == BindState::Bound {
        buf[3..11].copy_from_slice(&identity_digest(cfg));
        buf[11..19].copy_from_slice(&core.identify_str);
    } else {
        buf[3..9].copy_from_slice(&mac);
        buf[9..19].copy_from_slice(cfg.product_id.as_bytes());
    }
    Vec::from_slice(&buf).unwrap_or_default()
}
