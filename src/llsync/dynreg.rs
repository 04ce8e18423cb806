//! Dynamic registration.
//!
//! A device shipped with only the product secret asks the peer to register
//! it with the cloud. The peer relays a signed request and returns the
//! freshly issued device secret encrypted with AES-128-CBC:
//!
//! ```text
//! peer   DynRegRequest {nonce u32 BE, timestamp u32 BE}
//! device DynRegSign    {HMAC-SHA1(query, product_secret)[20], device_name}
//! peer   DynRegResult  {AES-128-CBC(device_secret ‖ zero padding)}
//! ```
//!
//! The AES key is the first 16 bytes of the product secret and the IV is
//! sixteen ASCII `'0'` characters.
//!
//! The exchange only runs on a device holding neither a secret nor a
//! binding, and each request admits a single result on the same link.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use core::fmt;
use core::fmt::Write as _;
use log::info;

use super::auth::{Signature, sign};
use super::identity::{DeviceSecret, SECRET_MAX};
use crate::config::LlsyncConfig;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const AES_BLOCK: usize = 16;
const KEY_LEN: usize = 16;
const IV: [u8; AES_BLOCK] = [b'0'; AES_BLOCK];

/// Largest ciphertext accepted: the secret capacity rounded up to a block.
const MAX_CIPHERTEXT: usize = SECRET_MAX.div_ceil(AES_BLOCK) * AES_BLOCK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynRegError {
    /// Dynamic registration is not enabled for this product.
    Disabled,
    /// No product secret of at least 16 bytes is configured.
    NoProductSecret,
    /// Payload length does not match the message layout.
    BadLength,
    /// The ciphertext could not be decrypted.
    Decrypt,
    /// The decrypted secret is empty or too long.
    BadSecret,
    /// The secret could not be persisted.
    Storage,
    /// Result with no request outstanding, or the device already holds a
    /// secret or a binding.
    WrongState,
}

impl fmt::Display for DynRegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "dynamic registration disabled"),
            Self::NoProductSecret => write!(f, "product secret missing"),
            Self::BadLength => write!(f, "payload length invalid"),
            Self::Decrypt => write!(f, "secret decryption failed"),
            Self::BadSecret => write!(f, "decrypted secret invalid"),
            Self::Storage => write!(f, "secret write failed"),
            Self::WrongState => write!(f, "no registration in progress"),
        }
    }
}

fn product_secret(cfg: &LlsyncConfig) -> Result<&[u8], DynRegError> {
    if !cfg.dynreg_enabled {
        return Err(DynRegError::Disabled);
    }
    match cfg.product_secret.as_ref() {
        Some(s) if s.len() >= KEY_LEN => Ok(s.as_bytes()),
        _ => Err(DynRegError::NoProductSecret),
    }
}

/// Sign a `DynRegRequest` payload with the product secret.
pub fn sign_request(cfg: &LlsyncConfig, payload: &[u8]) -> Result<Signature, DynRegError> {
    let key = product_secret(cfg)?;
    let b: &[u8; 8] = payload
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or(DynRegError::BadLength)?;
    let nonce = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    let timestamp = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);

    let mut query: heapless::String<128> = heapless::String::new();
    write!(
        query,
        "deviceName={}&nonce={}&productId={}&timestamp={}",
        cfg.device_name, nonce, cfg.product_id, timestamp
    )
    .map_err(|_| DynRegError::BadLength)?;
    Ok(sign(key, &[query.as_bytes()]))
}

/// Decrypt the device secret from a `DynRegResult` payload.
pub fn decrypt_secret(cfg: &LlsyncConfig, ciphertext: &[u8]) -> Result<DeviceSecret, DynRegError> {
    let key = product_secret(cfg)?;
    if ciphertext.is_empty()
        || ciphertext.len() % AES_BLOCK != 0
        || ciphertext.len() > MAX_CIPHERTEXT
    {
        return Err(DynRegError::BadLength);
    }

    let mut buf = [0u8; MAX_CIPHERTEXT];
    let buf = &mut buf[..ciphertext.len()];
    buf.copy_from_slice(ciphertext);
    let plain = Aes128CbcDec::new_from_slices(&key[..KEY_LEN], &IV)
        .map_err(|_| DynRegError::Decrypt)?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| DynRegError::Decrypt)?;

    let end = plain.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    if end == 0 {
        return Err(DynRegError::BadSecret);
    }
    let secret = DeviceSecret::from_slice(&plain[..end]).map_err(|_| DynRegError::BadSecret)?;
    info!("dynreg: device secret received ({} bytes)", secret.len());
    Ok(secret)
}
