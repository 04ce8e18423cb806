//! LLSync configuration parameters
//!
//! Device identity and every tunable of the binding handshake and the OTA
//! transfer. Values can be overridden via NVS (see [`ConfigPort`]).
//!
//! [`ConfigPort`]: crate::app::ports::ConfigPort

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::llsync::ota::PAGE_SIZE;

/// Product identifiers are always exactly this many ASCII characters.
pub const PRODUCT_ID_LEN: usize = 10;
/// Upper bound on the device name.
pub const DEVICE_NAME_MAX: usize = 48;
/// Smallest usable notification payload (ATT default MTU 23 minus 3).
pub const MIN_MTU: u16 = 20;

/// Core LLSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlsyncConfig {
    // --- Identity ---
    /// Ten-character product identifier issued by the cloud console
    pub product_id: String<PRODUCT_ID_LEN>,
    /// Device name, unique within the product
    pub device_name: String<DEVICE_NAME_MAX>,
    /// Product secret used only for dynamic registration
    pub product_secret: Option<String<32>>,

    // --- Binding ---
    /// Advertise "registration pending" and accept dynreg when no device
    /// secret is provisioned yet
    pub dynreg_enabled: bool,
    /// Require a local user confirmation before answering sync-time
    pub secure_bind: bool,
    /// Seconds the peer should wait for that confirmation
    pub secure_bind_wait_secs: u16,

    // --- Link ---
    /// Notification payload used until (or when) MTU negotiation fails
    pub default_mtu: u16,
    /// Tell the peer it may raise the MTU itself
    pub remote_may_set_mtu: bool,

    // --- OTA ---
    pub ota: OtaConfig,
}

/// OTA transfer parameters advertised to the peer in the request reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Accept OTA requests at all
    pub enabled: bool,
    /// Offer to resume a matching partial download
    pub resume: bool,
    /// Packages per acknowledged loop (sequence numbers wrap at this value)
    pub packages_per_loop: u8,
    /// Maximum package payload in bytes (further capped by the MTU)
    pub package_size: u8,
    /// Seconds without progress before the device re-sends its status
    pub retry_timeout_secs: u8,
    /// Seconds the peer should wait for the device to reboot
    pub reboot_timeout_secs: u8,
    /// Pacing hint between packages, in 10 ms units
    pub package_interval: u8,
    /// Consecutive silent retry periods before the session is abandoned
    pub max_retry: u8,
    /// Flash address where the image is staged (page aligned)
    pub image_base: u32,
    /// Bytes available for the staged image
    pub image_capacity: u32,
    /// Flash address of the resume record (page aligned, outside the image)
    pub resume_record_addr: u32,
}

impl Default for LlsyncConfig {
    fn default() -> Self {
        Self {
            // Identity
            product_id: bounded("0000000000"),
            device_name: bounded("llsync-dev"),
            product_secret: None,

            // Binding
            dynreg_enabled: false,
            secure_bind: false,
            secure_bind_wait_secs: 60,

            // Link
            default_mtu: MIN_MTU,
            remote_may_set_mtu: true,

            ota: OtaConfig::default(),
        }
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resume: true,
            packages_per_loop: 10,
            package_size: 128,
            retry_timeout_secs: 3,
            reboot_timeout_secs: 20,
            package_interval: 5,
            max_retry: 5,
            image_base: 0x0000_0000,
            image_capacity: 512 * 1024,
            resume_record_addr: 0x0008_0000, // first page after the image
        }
    }
}

impl LlsyncConfig {
    /// Build a configuration for the given device triple (minus the secret,
    /// which lives in the credential store).
    pub fn new(product_id: &str, device_name: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.product_id = String::new();
        cfg.product_id
            .push_str(product_id)
            .map_err(|_| ConfigError::ValidationFailed("product_id must be 10 characters"))?;
        cfg.device_name = String::new();
        cfg.device_name
            .push_str(device_name)
            .map_err(|_| ConfigError::ValidationFailed("device_name must be 1–48 characters"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range-check every field. Rejects, never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.product_id.len() != PRODUCT_ID_LEN || !self.product_id.is_ascii() {
            return Err(ConfigError::ValidationFailed(
                "product_id must be 10 ASCII characters",
            ));
        }
        if self.device_name.is_empty() || !self.device_name.is_ascii() {
            return Err(ConfigError::ValidationFailed(
                "device_name must be 1–48 ASCII characters",
            ));
        }
        if self.dynreg_enabled
            && self.product_secret.as_ref().is_none_or(|s| s.len() < 16)
        {
            return Err(ConfigError::ValidationFailed(
                "dynreg requires a product_secret of at least 16 bytes",
            ));
        }
        if self.secure_bind && !(1..=600).contains(&self.secure_bind_wait_secs) {
            return Err(ConfigError::ValidationFailed(
                "secure_bind_wait_secs must be 1–600",
            ));
        }
        if !(MIN_MTU..=512).contains(&self.default_mtu) {
            return Err(ConfigError::ValidationFailed("default_mtu must be 20–512"));
        }
        self.ota.validate()
    }
}

impl OtaConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.packages_per_loop == 0 {
            return Err(ConfigError::ValidationFailed(
                "ota.packages_per_loop must be at least 1",
            ));
        }
        if self.package_size < 16 {
            return Err(ConfigError::ValidationFailed(
                "ota.package_size must be at least 16",
            ));
        }
        if self.max_retry == 0 || self.retry_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "ota.max_retry and ota.retry_timeout_secs must be non-zero",
            ));
        }
        let page = PAGE_SIZE as u32;
        if self.image_base % page != 0 || self.resume_record_addr % page != 0 {
            return Err(ConfigError::ValidationFailed(
                "ota flash addresses must be page aligned",
            ));
        }
        if self.image_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "ota.image_capacity must be non-zero",
            ));
        }
        let image_end = self.image_base.saturating_add(self.image_capacity);
        let record_end = self.resume_record_addr.saturating_add(page);
        if self.resume_record_addr < image_end && self.image_base < record_end {
            return Err(ConfigError::ValidationFailed(
                "ota resume record overlaps the image area",
            ));
        }
        Ok(())
    }
}

fn bounded<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
