//! Identity and bind store.
//!
//! Holds the one [`CoreData`] record of the device and the provisioned
//! device secret. Only `Bound` ever reaches storage; `Wait` lives in RAM
//! and collapses back to `Idle` on reboot or disconnect.

use heapless::Vec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

/// Namespace of the bind record.
pub const CORE_NAMESPACE: &str = "llsync";
pub const CORE_KEY: &str = "core";

/// Credential namespace (encrypted NVS partition on target).
pub const CRED_NAMESPACE: &str = "auth";
pub const SECRET_KEY: &str = "secret";

pub const PSK_LEN: usize = 4;
pub const IDENTIFY_LEN: usize = 8;

/// Longest device secret accepted from provisioning or dynreg.
pub const SECRET_MAX: usize = 48;

/// Device secret bytes, used verbatim as the HMAC key.
pub type DeviceSecret = Vec<u8, SECRET_MAX>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BindState {
    #[default]
    Idle = 0,
    Wait = 1,
    Bound = 2,
}

/// Long-lived bind secret, written once per successful bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreData {
    pub bind_state: BindState,
    pub local_psk: [u8; PSK_LEN],
    pub identify_str: [u8; IDENTIFY_LEN],
}

pub struct IdentityStore {
    core: CoreData,
}

impl IdentityStore {
    /// Load the bind record; a missing or undecodable record means `Idle`.
    pub fn load(storage: &impl StoragePort) -> Self {
        let mut buf = [0u8; 32];
        let core = match storage.read(CORE_NAMESPACE, CORE_KEY, &mut buf) {
            Ok(len) => match postcard::from_bytes::<CoreData>(&buf[..len]) {
                Ok(core) if core.bind_state == BindState::Bound => {
                    info!("identity: bound record loaded");
                    core
                }
                Ok(_) => CoreData::default(),
                Err(_) => {
                    warn!("identity: bind record corrupted, starting unbound");
                    CoreData::default()
                }
            },
            Err(_) => CoreData::default(),
        };
        Self { core }
    }

    pub fn core(&self) -> &CoreData {
        &self.core
    }

    pub fn bind_state(&self) -> BindState {
        self.core.bind_state
    }

    pub fn is_bound(&self) -> bool {
        self.core.bind_state == BindState::Bound
    }

    /// Idle → Wait once the bind signature went out.
    pub fn begin_bind(&mut self) {
        if self.core.bind_state == BindState::Idle {
            self.core.bind_state = BindState::Wait;
        }
    }

    /// Wait → Idle. Other states are left alone.
    pub fn abandon_bind(&mut self) {
        if self.core.bind_state == BindState::Wait {
            self.core.bind_state = BindState::Idle;
        }
    }

    /// Wait → Bound, persisting the record first. On a storage failure the
    /// in-memory state is unchanged.
    pub fn commit_bind(
        &mut self,
        storage: &mut impl StoragePort,
        psk: [u8; PSK_LEN],
        identify: [u8; IDENTIFY_LEN],
    ) -> Result<(), StorageError> {
        let record = CoreData {
            bind_state: BindState::Bound,
            local_psk: psk,
            identify_str: identify,
        };
        let mut buf = [0u8; 32];
        let bytes = postcard::to_slice(&record, &mut buf).map_err(|_| StorageError::Corrupted)?;
        storage.write(CORE_NAMESPACE, CORE_KEY, bytes)?;
        self.core = record;
        Ok(())
    }

    /// Any → Idle, wiping the persisted record.
    pub fn clear(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        storage.delete(CORE_NAMESPACE, CORE_KEY)?;
        self.core = CoreData::default();
        Ok(())
    }
}

// ── Device secret ────────────────────────────────────────────

/// Read the provisioned device secret, if any.
pub fn load_secret(storage: &impl StoragePort) -> Option<DeviceSecret> {
    let mut buf = [0u8; SECRET_MAX];
    let len = storage.read(CRED_NAMESPACE, SECRET_KEY, &mut buf).ok()?;
    if len == 0 {
        return None;
    }
    Vec::from_slice(&buf[..len]).ok()
}

/// Persist the device secret in the credential namespace.
pub fn store_secret(storage: &mut impl StoragePort, secret: &[u8]) -> Result<(), StorageError> {
    if secret.is_empty() || secret.len() > SECRET_MAX {
        return Err(StorageError::OutOfRange);
    }
    storage.write(CRED_NAMESPACE, SECRET_KEY, secret)
}

pub fn has_secret(storage: &impl StoragePort) -> bool {
    storage.exists(CRED_NAMESPACE, SECRET_KEY)
}
