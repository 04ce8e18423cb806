//! Application service: the single LLSync context object.
//!
//! [`LlsyncService`] owns the platform, the configuration and the
//! [`Router`] with every piece of protocol state. The BLE stack and the
//! OTA timer call its entry points directly, or queue [`LinkEvent`]s on a
//! channel for [`drain`](LlsyncService::drain) /
//! [`next_event`](LlsyncService::next_event) when they run on other
//! threads.
//!
//! ```text
//!  BLE stack ──▶ ┌─────────────────────────────┐ ──▶ GattPort (notify, adv)
//!                │        LlsyncService         │ ──▶ StoragePort / FlashPort
//!  OTA timer ──▶ │ Router · Auth · OTA · Notify │ ──▶ EventSink
//!                └─────────────────────────────┘
//! ```

use log::{info, warn};

use crate::config::LlsyncConfig;
use crate::error::Result;
use crate::llsync::adv;
use crate::llsync::auth::BindDecision;
use crate::llsync::channels::{LinkEvent, LinkEventChannel};
use crate::llsync::identity::{self, BindState, IdentityStore};
use crate::llsync::notifier::ConnectionState;
use crate::llsync::router::Router;

use super::events::LlsyncEvent;
use super::ports::{ConfigPort, Platform};

// ───────────────────────────────────────────────────────────────
// LlsyncService
// ───────────────────────────────────────────────────────────────

pub struct LlsyncService<P: Platform> {
    platform: P,
    config: LlsyncConfig,
    router: Router,
}

impl<P: Platform> LlsyncService<P> {
    /// Validate the configuration and load the persisted bind record.
    ///
    /// Does **not** advertise; call [`start`](Self::start) next.
    pub fn new(platform: P, config: LlsyncConfig) -> Result<Self> {
        config.validate()?;
        let identity = IdentityStore::load(&platform);
        let router = Router::new(identity, config.default_mtu);
        Ok(Self {
            platform,
            config,
            router,
        })
    }

    /// Like [`new`](Self::new), reading the configuration from `store`.
    /// A missing or unreadable record falls back to the defaults.
    pub fn from_config_port(platform: P, store: &impl ConfigPort) -> Result<Self> {
        let config = store.load().unwrap_or_else(|e| {
            warn!("service: config load failed ({e}), using defaults");
            LlsyncConfig::default()
        });
        Self::new(platform, config)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Announce the persisted bind state and start advertising.
    pub fn start(&mut self) -> Result<()> {
        let state = self.router.bind_state();
        self.platform.emit(&LlsyncEvent::Started(state));
        info!("LlsyncService started, bind state {:?}", state);
        self.advertise()
    }

    /// (Re)build the advertisement from the current bind state.
    pub fn advertise(&mut self) -> Result<()> {
        let dynreg_pending =
            self.config.dynreg_enabled && !identity::has_secret(&self.platform);
        let data = adv::manufacturer_data(
            &self.config,
            self.router.auth().identity().core(),
            self.platform.mac_address(),
            dynreg_pending,
        );
        self.platform.start_advertising(&data)?;
        Ok(())
    }

    pub fn on_connect(&mut self) {
        self.platform.stop_advertising();
        self.router.on_connect();
        self.platform.emit(&LlsyncEvent::Connected);
        info!("service: central connected");
    }

    /// Reset all transient state and advertise again.
    pub fn on_disconnect(&mut self) {
        self.router.on_disconnect(&mut self.platform, &self.config);
        self.platform.emit(&LlsyncEvent::Disconnected);
        info!("service: central disconnected");
        if let Err(e) = self.advertise() {
            warn!("service: re-advertise failed: {e}");
        }
    }

    /// ATT MTU negotiated by the stack.
    pub fn on_mtu_changed(&mut self, att_mtu: u16) -> Result<()> {
        self.router.on_mtu_changed(&mut self.platform, att_mtu)
    }

    /// Bytes written by the peer to the characteristic `uuid16`.
    pub fn on_gatt_write(&mut self, uuid16: u16, data: &[u8]) -> Result<()> {
        self.router
            .on_write(&mut self.platform, &self.config, uuid16, data)
    }

    /// The OTA retry timer expired.
    pub fn on_ota_timer(&mut self) -> Result<()> {
        self.router.on_ota_timer(&mut self.platform, &self.config)
    }

    // ── Host-initiated ────────────────────────────────────────

    /// Local user answer to a [`LlsyncEvent::BindConfirmRequested`].
    pub fn confirm_bind(&mut self, decision: BindDecision) -> Result<()> {
        self.router
            .confirm_bind(&mut self.platform, &self.config, decision)
    }

    pub fn report_properties(&mut self, tlv: &[u8]) -> Result<()> {
        self.router.report_properties(&mut self.platform, tlv)
    }

    pub fn post_event(&mut self, event_id: u8, tlv: &[u8]) -> Result<()> {
        self.router.post_event(&mut self.platform, event_id, tlv)
    }

    pub fn request_status(&mut self) -> Result<()> {
        self.router.request_status(&mut self.platform)
    }

    /// Store a factory-provisioned device secret.
    pub fn provision_secret(&mut self, secret: &[u8]) -> Result<()> {
        identity::store_secret(&mut self.platform, secret)?;
        self.platform.emit(&LlsyncEvent::SecretProvisioned);
        Ok(())
    }

    // ── Channel plumbing ──────────────────────────────────────

    /// Apply one queued link event.
    pub fn handle(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::Connected => {
                self.on_connect();
                Ok(())
            }
            LinkEvent::Disconnected => {
                self.on_disconnect();
                Ok(())
            }
            LinkEvent::MtuChanged(mtu) => self.on_mtu_changed(mtu),
            LinkEvent::Write { uuid16, data } => self.on_gatt_write(uuid16, &data),
            LinkEvent::OtaTimerFired => self.on_ota_timer(),
        }
    }

    /// Process everything queued on `channel`; failures are logged and do
    /// not stop the drain. Returns the number of events handled.
    pub fn drain(&mut self, channel: &LinkEventChannel) -> usize {
        let mut handled = 0;
        while let Ok(event) = channel.try_receive() {
            if let Err(e) = self.handle(event) {
                warn!("service: link event failed: {e}");
            }
            handled += 1;
        }
        handled
    }

    /// Wait for the next link event and apply it.
    pub async fn next_event(&mut self, channel: &LinkEventChannel) -> Result<()> {
        let event = channel.receive().await;
        self.handle(event)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn bind_state(&self) -> BindState {
        self.router.bind_state()
    }

    pub fn connection(&self) -> ConnectionState {
        self.router.notifier().connection()
    }

    pub fn is_authenticated(&self) -> bool {
        self.router.notifier().is_authenticated()
    }

    /// Per-notification payload size in effect.
    pub fn mtu(&self) -> u16 {
        self.router.notifier().mtu()
    }

    /// `(received, file_size)` of a running OTA session.
    pub fn ota_progress(&self) -> Option<(u32, u32)> {
        self.router.ota().progress()
    }

    pub fn awaiting_confirm(&self) -> bool {
        self.router.auth().awaiting_confirm()
    }

    pub fn config(&self) -> &LlsyncConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}
