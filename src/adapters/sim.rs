//! Host simulation platform.
//!
//! [`SimPlatform`] implements every port the LLSync core needs, backed by
//! the in-memory NVS and flash adapters, and records everything the core
//! pushes out (notification slices, advertising, timer state, policy
//! hooks, data-template callbacks and events) for inspection by tests.

use heapless::Vec as HVec;
use log::debug;

use super::device_id::read_mac;
use super::flash::RamFlash;
use super::nvs::NvsAdapter;
use crate::app::events::LlsyncEvent;
use crate::app::ports::{
    DataTemplatePort, EventSink, FlashPort, GattPort, OtaPolicy, OtaTimerPort, OtaVerdict,
    StorageError, StoragePort, TimerError, TransportError,
};
use crate::config::OtaConfig;
use crate::llsync::msg::{BASE_HEADER_LEN, CharId, Direction, SliceState, header_len};
use crate::llsync::ota::{FileInfo, OtaStopReason, PAGE_SIZE};
use crate::llsync::slice::{FrameError, encode_slices};

/// One reassembled notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uplink {
    pub type_byte: u8,
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Everything the data-template layer was told, plus its scripted answers.
#[derive(Debug, Default)]
pub struct DataRecorder {
    pub report_replies: Vec<u8>,
    pub controls: Vec<Vec<u8>>,
    pub status_replies: Vec<(u8, Vec<u8>)>,
    pub actions: Vec<(u8, Vec<u8>)>,
    pub event_replies: Vec<(u8, u8)>,
    /// Result code returned for control writes.
    pub control_result: u8,
    /// Output TLV and result code returned for actions.
    pub action_output: Vec<u8>,
    pub action_result: u8,
}

pub struct SimPlatform {
    pub storage: NvsAdapter,
    pub flash: RamFlash,
    pub mac: [u8; 6],
    /// Every notification slice, in send order.
    pub notifications: Vec<Vec<u8>>,
    /// Current advertisement, `None` while stopped.
    pub advertising: Option<Vec<u8>>,
    pub advertise_count: usize,
    /// Seconds the OTA timer was last armed with, `None` while idle.
    pub timer: Option<u8>,
    pub timer_arms: usize,
    pub verdict: OtaVerdict,
    pub file_ok: bool,
    pub ota_started: Vec<FileInfo>,
    pub ota_stopped: Vec<OtaStopReason>,
    pub data: DataRecorder,
    pub events: Vec<LlsyncEvent>,
    fail_notify: bool,
    fail_timer: bool,
}

impl SimPlatform {
    /// A platform whose flash covers the default OTA layout.
    pub fn new() -> Self {
        let ota = OtaConfig::default();
        let flash_end = ota
            .resume_record_addr
            .max(ota.image_base + ota.image_capacity) as usize
            + PAGE_SIZE;
        Self::with_flash(flash_end)
    }

    pub fn with_flash(size: usize) -> Self {
        Self {
            storage: NvsAdapter::default(),
            flash: RamFlash::new(size),
            mac: read_mac(),
            notifications: Vec::new(),
            advertising: None,
            advertise_count: 0,
            timer: None,
            timer_arms: 0,
            verdict: OtaVerdict::Allow,
            file_ok: true,
            ota_started: Vec::new(),
            ota_stopped: Vec::new(),
            data: DataRecorder::default(),
            events: Vec::new(),
            fail_notify: false,
            fail_timer: false,
        }
    }

    /// Make every following notification fail with `SendFailed`.
    pub fn fail_notify(&mut self, fail: bool) {
        self.fail_notify = fail;
    }

    /// Make every following timer arm fail.
    pub fn fail_timer(&mut self, fail: bool) {
        self.fail_timer = fail;
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Reassemble and drain every notification sent so far.
    pub fn take_uplinks(&mut self) -> Vec<Uplink> {
        let mut out = Vec::new();
        let mut partial: Option<Uplink> = None;
        for slice in self.notifications.drain(..) {
            let Some((&type_byte, rest)) = slice.split_first() else {
                continue;
            };
            if rest.len() < 2 {
                continue;
            }
            let (state, len) = SliceState::unpack(u16::from_be_bytes([rest[0], rest[1]]));
            let prefix = header_len(Direction::Uplink, CharId::DeviceInfo, type_byte);
            let header = slice[BASE_HEADER_LEN..prefix].to_vec();
            let chunk = &slice[prefix..prefix + len];
            match state {
                SliceState::NoSlice => out.push(Uplink {
                    type_byte,
                    header,
                    payload: chunk.to_vec(),
                }),
                SliceState::Head => {
                    partial = Some(Uplink {
                        type_byte,
                        header,
                        payload: chunk.to_vec(),
                    });
                }
                SliceState::Body | SliceState::Tail => {
                    if let Some(p) = partial.as_mut() {
                        p.payload.extend_from_slice(chunk);
                    }
                    if state == SliceState::Tail {
                        out.extend(partial.take());
                    }
                }
            }
        }
        out
    }

    /// Drain the recorded events.
    pub fn take_events(&mut self) -> Vec<LlsyncEvent> {
        core::mem::take(&mut self.events)
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice a downlink message the way the companion app does.
pub fn downlink_slices(
    mtu: u16,
    type_byte: u8,
    header: &[u8],
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut out = Vec::new();
    encode_slices(mtu, type_byte, header, payload, |s| {
        out.push(s.to_vec());
        Ok(())
    })?;
    Ok(out)
}

// ── Ports ────────────────────────────────────────────────────

impl GattPort for SimPlatform {
    fn notify(&mut self, slice: &[u8]) -> Result<(), TransportError> {
        if self.fail_notify {
            return Err(TransportError::SendFailed);
        }
        debug!("sim: notify {} bytes", slice.len());
        self.notifications.push(slice.to_vec());
        Ok(())
    }

    fn start_advertising(&mut self, manufacturer_data: &[u8]) -> Result<(), TransportError> {
        self.advertising = Some(manufacturer_data.to_vec());
        self.advertise_count += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.advertising = None;
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}

impl StoragePort for SimPlatform {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.storage.read(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.storage.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.storage.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.storage.exists(namespace, key)
    }
}

impl FlashPort for SimPlatform {
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError> {
        self.flash.erase(addr, len)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        self.flash.program(addr, data)
    }

    fn read_at(&self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        self.flash.read_at(addr, buf)
    }
}

impl OtaTimerPort for SimPlatform {
    fn arm(&mut self, timeout_secs: u8) -> Result<(), TimerError> {
        if self.fail_timer {
            return Err(TimerError::Unavailable);
        }
        self.timer = Some(timeout_secs);
        self.timer_arms += 1;
        Ok(())
    }

    fn cancel(&mut self) {
        self.timer = None;
    }
}

impl OtaPolicy for SimPlatform {
    fn allow_ota(&mut self, _file: &FileInfo) -> OtaVerdict {
        self.verdict
    }

    fn validate_file(&mut self, _file_size: u32, _version: &str) -> bool {
        self.file_ok
    }

    fn ota_started(&mut self, file: &FileInfo) {
        self.ota_started.push(file.clone());
    }

    fn ota_stopped(&mut self, reason: OtaStopReason) {
        self.ota_stopped.push(reason);
    }
}

impl DataTemplatePort for SimPlatform {
    fn on_report_reply(&mut self, result: u8) {
        self.data.report_replies.push(result);
    }

    fn on_control(&mut self, tlv: &[u8]) -> u8 {
        self.data.controls.push(tlv.to_vec());
        self.data.control_result
    }

    fn on_get_status_reply(&mut self, result: u8, tlv: &[u8]) {
        self.data.status_replies.push((result, tlv.to_vec()));
    }

    fn on_action(&mut self, action_id: u8, tlv: &[u8], out: &mut HVec<u8, 256>) -> u8 {
        self.data.actions.push((action_id, tlv.to_vec()));
        let _ = out.extend_from_slice(&self.data.action_output);
        self.data.action_result
    }

    fn on_event_reply(&mut self, event_id: u8, result: u8) {
        self.data.event_replies.push((event_id, result));
    }
}

impl EventSink for SimPlatform {
    fn emit(&mut self, event: &LlsyncEvent) {
        self.events.push(event.clone());
    }
}
