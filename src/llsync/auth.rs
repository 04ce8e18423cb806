//! Binding and connection authentication via HMAC-SHA1 challenge/response.
//!
//! ```text
//!  Idle ──sync-time{nonce,ts}──▶ Wait ──bind-success{psk,identify}──▶ Bound
//!   ▲                             │                                    │
//!   └──────bind-fail / timeout────┘◀───────── unbind-success ──────────┘
//! ```
//!
//! Once `Bound`, every reconnect runs connect-valid: the peer signs its
//! timestamp with the PSK, the device verifies and signs back, and the
//! link is trusted only after the peer's separate connect-success.
//!
//! A signature mismatch fails the step only. The link stays up and no
//! state changes; the peer decides whether to retry.

use burster::Limiter;
use core::fmt;
use core::fmt::Write as _;
use core::time::Duration;
use hmac::{Hmac, Mac};
use log::{info, warn};
use sha1::Sha1;

use super::identity::{BindState, IDENTIFY_LEN, IdentityStore, PSK_LEN};
use super::msg::EXPIRATION_SECS;
use crate::app::ports::StoragePort;
use crate::config::LlsyncConfig;

type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1 digest length.
pub const SIGN_LEN: usize = 20;

pub type Signature = [u8; SIGN_LEN];

const UNBIND_REQUEST: &[u8] = b"UnbindRequest";
const UNBIND_RESPONSE: &[u8] = b"UnbindResponse";

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The message is not legal in the current bind state.
    WrongState,
    /// Sync-time arrived while already bound.
    AlreadyBound,
    /// Connect-valid or unbind without a bind record.
    NotBound,
    /// The peer's signature did not verify.
    SignatureMismatch,
    /// Payload length does not match the message layout.
    BadLength,
    /// Too many verification attempts; try again later.
    RateLimited,
    /// No device secret has been provisioned.
    NoSecret,
    /// The bind record could not be written.
    Storage,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongState => write!(f, "message not valid in current bind state"),
            Self::AlreadyBound => write!(f, "device already bound"),
            Self::NotBound => write!(f, "device not bound"),
            Self::SignatureMismatch => write!(f, "signature mismatch"),
            Self::BadLength => write!(f, "payload length invalid"),
            Self::RateLimited => write!(f, "verification rate limit exceeded"),
            Self::NoSecret => write!(f, "device secret not provisioned"),
            Self::Storage => write!(f, "bind record write failed"),
        }
    }
}

// ── Handshake types ──────────────────────────────────────────

/// Sync-time challenge from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTime {
    pub nonce: u32,
    pub timestamp: u32,
}

impl SyncTime {
    pub fn parse(payload: &[u8]) -> Result<Self, AuthError> {
        let b: &[u8; 8] = payload
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or(AuthError::BadLength)?;
        Ok(Self {
            nonce: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            timestamp: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        })
    }
}

/// Result of a sync-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Send this bind signature now.
    Signed(Signature),
    /// Secure bind: tell the peer to wait this many seconds for the user.
    AwaitConfirm(u16),
}

/// Local user decision on a parked secure-bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindDecision {
    Accept = 0,
    Reject = 1,
    Timeout = 2,
}

/// Reply to [`BindDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Signed(Signature),
    /// One-byte refusal code for the bind-sign reply.
    Refused(u8),
}

// ── Signing ──────────────────────────────────────────────────

/// HMAC-SHA1 over the concatenation of `parts`.
pub fn sign(key: &[u8], parts: &[&[u8]]) -> Signature {
    let mut out = [0u8; SIGN_LEN];
    // HMAC accepts keys of any length
    if let Ok(mut mac) = HmacSha1::new_from_slice(key) {
        for p in parts {
            mac.update(p);
        }
        out.copy_from_slice(&mac.finalize().into_bytes());
    }
    out
}

/// Constant-time verification of `tag` against HMAC-SHA1(`key`, `parts`).
pub fn verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
        return false;
    };
    for p in parts {
        mac.update(p);
    }
    mac.verify_slice(tag).is_ok()
}

/// Bind signature: `"{product_id}{device_name};{nonce};{timestamp + 60}"`
/// keyed by the device secret.
pub fn bind_signature(cfg: &LlsyncConfig, secret: &[u8], sync: SyncTime) -> Signature {
    let mut tail: heapless::String<24> = heapless::String::new();
    let _ = write!(
        tail,
        ";{};{}",
        sync.nonce,
        sync.timestamp.wrapping_add(EXPIRATION_SECS)
    );
    sign(
        secret,
        &[
            cfg.product_id.as_bytes(),
            cfg.device_name.as_bytes(),
            tail.as_bytes(),
        ],
    )
}

/// Connect reply: `"{timestamp + 60}{product_id}{device_name}"` keyed by
/// the PSK.
pub fn connect_signature(cfg: &LlsyncConfig, psk: &[u8], timestamp: u32) -> Signature {
    let mut ts: heapless::String<10> = heapless::String::new();
    let _ = write!(ts, "{}", timestamp.wrapping_add(EXPIRATION_SECS));
    sign(
        psk,
        &[
            ts.as_bytes(),
            cfg.product_id.as_bytes(),
            cfg.device_name.as_bytes(),
        ],
    )
}

// ── State machine ────────────────────────────────────────────

pub struct Authenticator {
    identity: IdentityStore,
    conn_pending: bool,
    unbind_pending: bool,
    parked: Option<SyncTime>,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl Authenticator {
    pub fn new(identity: IdentityStore) -> Self {
        Self {
            identity,
            conn_pending: false,
            unbind_pending: false,
            parked: None,
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                10,
                10, // 10 verifications per second, 10 burst
                platform_now as fn() -> Duration,
            ),
        }
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn bind_state(&self) -> BindState {
        self.identity.bind_state()
    }

    /// A secure-bind request is waiting for [`confirm`](Self::confirm).
    pub fn awaiting_confirm(&self) -> bool {
        self.parked.is_some()
    }

    /// Peer sync-time. Signs immediately, or parks the challenge when
    /// secure bind is on.
    pub fn on_sync_time(
        &mut self,
        cfg: &LlsyncConfig,
        secret: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<SyncOutcome, AuthError> {
        let sync = SyncTime::parse(payload)?;
        if self.identity.is_bound() {
            return Err(AuthError::AlreadyBound);
        }
        let secret = secret.ok_or(AuthError::NoSecret)?;

        if cfg.secure_bind {
            info!("auth: secure bind, waiting {}s for user", cfg.secure_bind_wait_secs);
            self.parked = Some(sync);
            return Ok(SyncOutcome::AwaitConfirm(cfg.secure_bind_wait_secs));
        }

        let sig = bind_signature(cfg, secret, sync);
        self.identity.begin_bind();
        Ok(SyncOutcome::Signed(sig))
    }

    /// Resolve a parked secure-bind request.
    pub fn confirm(
        &mut self,
        cfg: &LlsyncConfig,
        secret: Option<&[u8]>,
        decision: BindDecision,
    ) -> Result<ConfirmOutcome, AuthError> {
        let sync = self.parked.ok_or(AuthError::WrongState)?;
        if decision != BindDecision::Accept {
            self.parked = None;
            self.identity.abandon_bind();
            info!("auth: secure bind {:?}", decision);
            return Ok(ConfirmOutcome::Refused(decision as u8));
        }
        let secret = secret.ok_or(AuthError::NoSecret)?;
        self.parked = None;
        let sig = bind_signature(cfg, secret, sync);
        self.identity.begin_bind();
        Ok(ConfirmOutcome::Signed(sig))
    }

    /// Peer bind-success carrying `{psk[4], identify[8]}`.
    pub fn on_bind_success(
        &mut self,
        storage: &mut impl StoragePort,
        payload: &[u8],
    ) -> Result<(), AuthError> {
        if self.identity.bind_state() != BindState::Wait {
            return Err(AuthError::WrongState);
        }
        if payload.len() < PSK_LEN + IDENTIFY_LEN {
            return Err(AuthError::BadLength);
        }
        let mut psk = [0u8; PSK_LEN];
        let mut identify = [0u8; IDENTIFY_LEN];
        psk.copy_from_slice(&payload[..PSK_LEN]);
        identify.copy_from_slice(&payload[PSK_LEN..PSK_LEN + IDENTIFY_LEN]);

        self.identity
            .commit_bind(storage, psk, identify)
            .map_err(|e| {
                warn!("auth: bind record write failed: {e}");
                AuthError::Storage
            })?;
        info!("auth: bound");
        Ok(())
    }

    /// Peer bind-fail or bind-timeout.
    pub fn on_bind_abort(&mut self) {
        self.parked = None;
        self.identity.abandon_bind();
    }

    /// Peer connect-valid `{timestamp u32 BE, sig[20]}`.
    pub fn on_conn_valid(
        &mut self,
        cfg: &LlsyncConfig,
        payload: &[u8],
    ) -> Result<Signature, AuthError> {
        if !self.identity.is_bound() {
            return Err(AuthError::NotBound);
        }
        if payload.len() < 4 + SIGN_LEN {
            return Err(AuthError::BadLength);
        }
        if !self.check_rate_limit() {
            return Err(AuthError::RateLimited);
        }
        let (ts_bytes, tag) = payload.split_at(4);
        let psk = self.identity.core().local_psk;
        if !verify(&psk, &[ts_bytes], &tag[..SIGN_LEN]) {
            warn!("auth: connect signature mismatch");
            return Err(AuthError::SignatureMismatch);
        }
        let ts = u32::from_be_bytes([ts_bytes[0], ts_bytes[1], ts_bytes[2], ts_bytes[3]]);
        self.conn_pending = true;
        Ok(connect_signature(cfg, &psk, ts))
    }

    /// Peer connect-success. Returns `true` only when it confirms a
    /// verified connect-valid.
    pub fn on_conn_success(&mut self) -> bool {
        core::mem::take(&mut self.conn_pending)
    }

    pub fn on_conn_fail(&mut self) {
        self.conn_pending = false;
    }

    /// Peer unbind request `{sig[20]}` over a fixed literal.
    pub fn on_unbind(&mut self, payload: &[u8]) -> Result<Signature, AuthError> {
        if !self.identity.is_bound() {
            return Err(AuthError::NotBound);
        }
        if payload.len() < SIGN_LEN {
            return Err(AuthError::BadLength);
        }
        if !self.check_rate_limit() {
            return Err(AuthError::RateLimited);
        }
        let psk = self.identity.core().local_psk;
        if !verify(&psk, &[UNBIND_REQUEST], &payload[..SIGN_LEN]) {
            warn!("auth: unbind signature mismatch");
            return Err(AuthError::SignatureMismatch);
        }
        self.unbind_pending = true;
        Ok(sign(&psk, &[UNBIND_RESPONSE]))
    }

    /// Peer unbind-success. Clears the bind record only when it confirms
    /// a verified unbind request; returns whether it did.
    pub fn on_unbind_success(&mut self, storage: &mut impl StoragePort) -> Result<bool, AuthError> {
        if !self.unbind_pending {
            return Ok(false);
        }
        self.identity.clear(storage).map_err(|_| AuthError::Storage)?;
        self.unbind_pending = false;
        info!("auth: unbound");
        Ok(true)
    }

    pub fn on_unbind_fail(&mut self) {
        self.unbind_pending = false;
    }

    /// Drop every transient handshake flag.
    pub fn on_disconnect(&mut self) {
        self.conn_pending = false;
        self.unbind_pending = false;
        self.parked = None;
        self.identity.abandon_bind();
    }

    fn check_rate_limit(&mut self) -> bool {
        self.rate_limiter.try_consume(1).is_ok()
    }
}

// ── Platform time for rate limiter ───────────────────────────

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    // SAFETY: esp_timer_get_time reads a monotonic hardware counter.
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────
