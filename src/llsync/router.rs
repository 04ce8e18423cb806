//! Message router.
//!
//! ```text
//!  GATT write ─▶ SliceAssembly ─▶ Downlink::decode ─┬─▶ device info (bind, MTU, dynreg)
//!                                                   ├─▶ data template (post-auth)
//!                                                   ├─▶ OTA engine   (post-auth)
//!                                                   └─▶ gateway / unknown → drop
//! ```
//!
//! The router owns every piece of per-link protocol state. Each entry
//! point takes the platform and configuration by reference so the owner
//! can hold them as sibling fields.

use heapless::Vec;
use log::{debug, info, warn};

use super::auth::{
    Authenticator, BindDecision, ConfirmOutcome, SIGN_LEN, Signature, SyncOutcome,
};
use super::dynreg::{self, DynRegError};
use super::identity::{self, BindState, IdentityStore};
use super::msg::{CharId, DataKind, DeviceInfoType, Downlink, OtaType, UplinkType};
use super::notifier::{Notifier, mtu_report};
use super::ota::{OtaEngine, OtaReply};
use super::slice::{Message, SliceAssembly};
use crate::app::events::LlsyncEvent;
use crate::app::ports::{EventSink, Platform};
use crate::config::{DEVICE_NAME_MAX, LlsyncConfig};
use crate::error::{Error, Result};

const SIGNED_NAME_MAX: usize = SIGN_LEN + DEVICE_NAME_MAX;

/// Signature followed by the device name.
type SignedName = Vec<u8, SIGNED_NAME_MAX>;

pub struct Router {
    assembly: SliceAssembly,
    auth: Authenticator,
    ota: OtaEngine,
    notifier: Notifier,
    /// `DynRegSign` went out on this link and no result has arrived yet.
    dynreg_pending: bool,
}

impl Router {
    pub fn new(identity: IdentityStore, default_mtu: u16) -> Self {
        Self {
            assembly: SliceAssembly::new(),
            auth: Authenticator::new(identity),
            ota: OtaEngine::new(),
            notifier: Notifier::new(default_mtu),
            dynreg_pending: false,
        }
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn ota(&self) -> &OtaEngine {
        &self.ota
    }

    pub fn bind_state(&self) -> BindState {
        self.auth.bind_state()
    }

    // ── Link lifecycle ───────────────────────────────────────

    pub fn on_connect(&mut self) {
        self.assembly.reset();
        self.dynreg_pending = false;
        self.notifier.on_connect();
    }

    /// Tear down every transient state: the in-flight assembly, a running
    /// OTA session, pending handshake steps and the link flags.
    pub fn on_disconnect<P: Platform>(&mut self, p: &mut P, cfg: &LlsyncConfig) {
        let from = self.auth.bind_state();
        self.assembly.reset();
        self.dynreg_pending = false;
        self.ota.on_disconnect(p, &cfg.ota);
        self.auth.on_disconnect();
        self.notifier.on_disconnect();
        self.bind_transition(p, from);
    }

    /// Import an ATT MTU from the stack and tell the peer when a link is up.
    pub fn on_mtu_changed<P: Platform>(&mut self, p: &mut P, att_mtu: u16) -> Result<()> {
        let mtu = self.notifier.set_mtu(att_mtu.saturating_sub(3));
        p.emit(&LlsyncEvent::MtuChanged(mtu));
        if !self.notifier.connection().ble_connected {
            return Ok(());
        }
        self.notifier
            .send(p, UplinkType::SyncMtu, 0, &[], &mtu.to_be_bytes())
    }

    pub fn on_ota_timer<P: Platform>(&mut self, p: &mut P, cfg: &LlsyncConfig) -> Result<()> {
        match self.ota.on_timer(p, &cfg.ota) {
            Some(reply) => self.send_ota(p, reply),
            None => Ok(()),
        }
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Feed one GATT write. Completed messages are dispatched immediately;
    /// writes to unknown characteristics are dropped.
    pub fn on_write<P: Platform>(
        &mut self,
        p: &mut P,
        cfg: &LlsyncConfig,
        uuid16: u16,
        data: &[u8],
    ) -> Result<()> {
        let Some(char) = CharId::from_uuid16(uuid16) else {
            warn!("router: write to unknown characteristic {uuid16:#06x} dropped");
            return Ok(());
        };
        match self.assembly.feed(char, data) {
            Ok(Some(msg)) => self.dispatch(p, cfg, &msg),
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("router: slice on {char:?} discarded: {e}");
                Err(e.into())
            }
        }
    }

    /// Route one reassembled message.
    pub fn dispatch<P: Platform>(
        &mut self,
        p: &mut P,
        cfg: &LlsyncConfig,
        msg: &Message,
    ) -> Result<()> {
        let downlink = Downlink::decode(msg.char, msg.type_byte);
        debug!("router: {downlink:?}, {} byte payload", msg.payload.len());
        let result = match downlink {
            Downlink::DeviceInfo(ty) => self.device_info(p, cfg, ty, &msg.payload),
            Downlink::Data { kind, id } => self.data(p, kind, id, msg),
            Downlink::Ota(ty) => self.ota_message(p, cfg, ty, &msg.payload),
            Downlink::Gateway(ty) => {
                warn!("router: gateway message {ty:#04x} not supported, dropped");
                Ok(())
            }
            Downlink::Unknown { char, type_byte } => {
                warn!("router: unknown type {type_byte:#04x} on {char:?}, dropped");
                Ok(())
            }
        };
        if let Err(e) = &result {
            warn!("router: {downlink:?} failed: {e}");
        }
        result
    }

    fn device_info<P: Platform>(
        &mut self,
        p: &mut P,
        cfg: &LlsyncConfig,
        ty: DeviceInfoType,
        payload: &[u8],
    ) -> Result<()> {
        let from = self.auth.bind_state();
        match ty {
            DeviceInfoType::SyncTime => {
                let secret = identity::load_secret(&*p);
                match self.auth.on_sync_time(cfg, secret.as_deref(), payload)? {
                    SyncOutcome::Signed(sig) => {
                        self.bind_transition(p, from);
                        self.send_signed(p, cfg, UplinkType::BindSignRet, &sig)?;
                    }
                    SyncOutcome::AwaitConfirm(wait_secs) => {
                        p.emit(&LlsyncEvent::BindConfirmRequested { wait_secs });
                        self.notifier.send(
                            p,
                            UplinkType::SyncWaitTime,
                            0,
                            &[],
                            &wait_secs.to_be_bytes(),
                        )?;
                    }
                }
            }
            DeviceInfoType::ConnValid => {
                let sig = self.auth.on_conn_valid(cfg, payload)?;
                self.send_signed(p, cfg, UplinkType::ConnSignRet, &sig)?;
            }
            DeviceInfoType::BindSuccess => {
                self.auth.on_bind_success(p, payload)?;
                self.notifier.set_authenticated(true);
                self.bind_transition(p, from);
                p.emit(&LlsyncEvent::LinkAuthenticated);
            }
            DeviceInfoType::BindFail | DeviceInfoType::BindTimeout => {
                info!("auth: peer ended bind ({ty:?})");
                self.auth.on_bind_abort();
                self.bind_transition(p, from);
            }
            DeviceInfoType::Unbind => {
                let sig = self.auth.on_unbind(payload)?;
                self.notifier.send(p, UplinkType::UnbindSignRet, 0, &[], &sig)?;
            }
            DeviceInfoType::ConnSuccess => {
                if self.auth.on_conn_success() {
                    info!("auth: link authenticated");
                    self.notifier.set_authenticated(true);
                    p.emit(&LlsyncEvent::LinkAuthenticated);
                } else {
                    warn!("auth: connect-success without a verified connect-valid, ignored");
                }
            }
            DeviceInfoType::ConnFail => self.auth.on_conn_fail(),
            DeviceInfoType::UnbindSuccess => {
                if self.auth.on_unbind_success(p)? {
                    self.notifier.set_authenticated(false);
                    self.bind_transition(p, from);
                } else {
                    warn!("auth: unbind-success without a verified unbind request, ignored");
                }
            }
            DeviceInfoType::UnbindFail => self.auth.on_unbind_fail(),
            DeviceInfoType::SetMtuResult => {
                let requested = match payload {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                let mtu = self.notifier.set_mtu(requested);
                info!("router: peer MTU {requested}, using {mtu}");
                p.emit(&LlsyncEvent::MtuChanged(mtu));
            }
            DeviceInfoType::GetDevInfo => {
                let report = mtu_report(cfg, self.notifier.mtu());
                self.notifier.send(p, UplinkType::ReportMtu, 0, &[], &report)?;
            }
            DeviceInfoType::DynRegRequest => {
                let sig = dynreg::sign_request(cfg, payload)?;
                if !self.dynreg_allowed(p) {
                    return Err(DynRegError::WrongState.into());
                }
                self.send_signed(p, cfg, UplinkType::DynRegSign, &sig)?;
                self.dynreg_pending = true;
            }
            DeviceInfoType::DynRegResult => {
                let solicited = core::mem::take(&mut self.dynreg_pending);
                if !solicited || !self.dynreg_allowed(p) {
                    return Err(DynRegError::WrongState.into());
                }
                let secret = dynreg::decrypt_secret(cfg, payload)?;
                identity::store_secret(p, &secret)?;
                info!("dynreg: device secret stored");
                p.emit(&LlsyncEvent::SecretProvisioned);
            }
        }
        Ok(())
    }

    fn data<P: Platform>(&mut self, p: &mut P, kind: DataKind, id: u8, msg: &Message) -> Result<()> {
        if !self.notifier.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        let code = msg.payload.first().copied().unwrap_or(0);
        match kind {
            DataKind::ReportReply => p.on_report_reply(code),
            DataKind::Control => {
                let result = p.on_control(&msg.payload);
                self.notifier
                    .send(p, UplinkType::ControlReply, 0, &[], &[result])?;
            }
            DataKind::GetStatusReply => {
                let result = msg.header.first().copied().unwrap_or(0);
                p.on_get_status_reply(result, &msg.payload);
            }
            DataKind::Action => {
                let mut out = Vec::new();
                let result = p.on_action(id, &msg.payload, &mut out);
                self.notifier
                    .send(p, UplinkType::ActionReply, id, &[result], &out)?;
            }
            DataKind::EventReply => p.on_event_reply(id, code),
        }
        Ok(())
    }

    fn ota_message<P: Platform>(
        &mut self,
        p: &mut P,
        cfg: &LlsyncConfig,
        ty: OtaType,
        payload: &[u8],
    ) -> Result<()> {
        if !self.notifier.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        match ty {
            OtaType::Request => {
                let reply = self
                    .ota
                    .on_request(p, &cfg.ota, self.notifier.mtu(), payload)?;
                if let (OtaReply::Accepted(a), Some((_, size))) = (reply, self.ota.progress()) {
                    p.emit(&LlsyncEvent::OtaStarted {
                        size,
                        resume_from: a.start_offset,
                    });
                }
                self.send_ota(p, reply)
            }
            OtaType::Package => match self.ota.on_package(p, &cfg.ota, payload) {
                Ok(Some(reply)) => {
                    if let (OtaReply::Progress { .. }, Some((received, size))) =
                        (reply, self.ota.progress())
                    {
                        p.emit(&LlsyncEvent::OtaProgress { received, size });
                    }
                    self.send_ota(p, reply)
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    // the engine already ended the session; announce it
                    if let Some(result) = e.check_result() {
                        if let Err(send) = self.send_ota(p, OtaReply::Check(result)) {
                            warn!("ota: abort notice not sent: {send}");
                        }
                    }
                    Err(e.into())
                }
            },
            OtaType::End => {
                let reply = self.ota.on_end(p, &cfg.ota)?;
                self.send_ota(p, reply)
            }
        }
    }

    // ── Host-initiated ───────────────────────────────────────

    /// Resolve a parked secure-bind request.
    pub fn confirm_bind<P: Platform>(
        &mut self,
        p: &mut P,
        cfg: &LlsyncConfig,
        decision: BindDecision,
    ) -> Result<()> {
        let from = self.auth.bind_state();
        let secret = identity::load_secret(&*p);
        match self.auth.confirm(cfg, secret.as_deref(), decision)? {
            ConfirmOutcome::Signed(sig) => {
                self.bind_transition(p, from);
                self.send_signed(p, cfg, UplinkType::BindSignRet, &sig)
            }
            ConfirmOutcome::Refused(code) => {
                self.bind_transition(p, from);
                self.notifier
                    .send(p, UplinkType::BindSignRet, 0, &[], &[code])
            }
        }
    }

    pub fn report_properties<P: Platform>(&mut self, p: &mut P, tlv: &[u8]) -> Result<()> {
        self.notifier.send(p, UplinkType::PropertyReport, 0, &[], tlv)
    }

    pub fn post_event<P: Platform>(&mut self, p: &mut P, event_id: u8, tlv: &[u8]) -> Result<()> {
        self.notifier.send(p, UplinkType::EventPost, event_id, &[], tlv)
    }

    pub fn request_status<P: Platform>(&mut self, p: &mut P) -> Result<()> {
        self.notifier.send(p, UplinkType::GetStatus, 0, &[], &[])
    }

    // ── Helpers ──────────────────────────────────────────────

    fn send_signed<P: Platform>(
        &self,
        p: &mut P,
        cfg: &LlsyncConfig,
        ty: UplinkType,
        sig: &Signature,
    ) -> Result<()> {
        let mut body = SignedName::new();
        // capacity covers the signature and the longest device name
        let _ = body.extend_from_slice(sig);
        let _ = body.extend_from_slice(cfg.device_name.as_bytes());
        self.notifier.send(p, ty, 0, &[], &body)
    }

    /// Registration only runs on a device with neither a secret nor a binding.
    fn dynreg_allowed<P: Platform>(&self, p: &P) -> bool {
        !identity::has_secret(p) && self.auth.bind_state() != BindState::Bound
    }

    fn send_ota<P: Platform>(&self, p: &mut P, reply: OtaReply) -> Result<()> {
        self.notifier
            .send(p, reply.uplink_type(), 0, &[], &reply.encode())
    }

    fn bind_transition<E: EventSink>(&self, sink: &mut E, from: BindState) {
        let to = self.auth.bind_state();
        if from != to {
            info!("auth: bind state {from:?} -> {to:?}");
            sink.emit(&LlsyncEvent::BindStateChanged { from, to });
        }
    }
}
