//! Unified error type for the LLSync device core.
//!
//! Every subsystem owns a small `Copy` error enum next to the code that
//! raises it; this module funnels them into one [`Error`] so the service
//! entry points can propagate with `?` and log uniformly.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError, TransportError};
use crate::llsync::auth::AuthError;
use crate::llsync::dynreg::DynRegError;
use crate::llsync::ota::OtaError;
use crate::llsync::slice::FrameError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible LLSync operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Slicing or reassembly failed; the message was discarded.
    Frame(FrameError),
    /// A handshake step was refused; no state was changed.
    Auth(AuthError),
    /// Dynamic registration failed.
    DynReg(DynRegError),
    /// The OTA session refused or aborted.
    Ota(OtaError),
    /// The GATT layer could not deliver a notification.
    Transport(TransportError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// An uplink other than a handshake reply was attempted before the
    /// link was authenticated.
    NotAuthenticated,
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Auth(e) => write!(f, "auth: {e}"),
            Self::DynReg(e) => write!(f, "dynreg: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::NotAuthenticated => write!(f, "link not authenticated"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<DynRegError> for Error {
    fn from(e: DynRegError) -> Self {
        Self::DynReg(e)
    }
}

impl From<OtaError> for Error {
    fn from(e: OtaError) -> Self {
        Self::Ota(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(match e {
            ConfigError::ValidationFailed(msg) => msg,
            ConfigError::NotFound => "not found",
            ConfigError::Corrupted => "stored config corrupted",
            ConfigError::IoError => "I/O error",
        })
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
