//! Resumable OTA transfer.
//!
//! Flow: Request → N × Package (in loops of `packages_per_loop`) → End
//!
//! Packages carry a one-byte sequence number that wraps at the loop size.
//! In-order data is staged in RAM and flushed to flash one page at a time;
//! each flush updates the resume record so a later request for the same
//! file (matching size and CRC) can continue from the last full page.
//!
//! The retry timer is armed on every accepted request and package and is
//! cancelled on every path that ends the session.

use core::fmt;
use heapless::{String, Vec};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::msg::{BASE_HEADER_LEN, UplinkType};
use crate::app::events::LlsyncEvent;
use crate::app::ports::{
    EventSink, FlashPort, OtaDenyReason, OtaPolicy, OtaTimerPort, OtaVerdict, StorageError,
};
use crate::config::OtaConfig;

/// Flash page: unit of erase, flush and resume granularity.
pub const PAGE_SIZE: usize = 4096;

/// Longest version string in a request.
pub const VERSION_MAX: usize = 32;

const RESUME_MAGIC: u32 = 0x4C4C_4F54;
const RECORD_BUF: usize = 32;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    /// Package or end with no accepted request.
    NoSession,
    /// Payload length does not match the message layout.
    BadLength,
    /// Package would exceed the declared file size.
    Overflow,
    /// Flash erase or program failed; the session was aborted.
    WriteFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => write!(f, "no OTA session"),
            Self::BadLength => write!(f, "payload length invalid"),
            Self::Overflow => write!(f, "package exceeds declared file size"),
            Self::WriteFailed => write!(f, "flash write failed"),
        }
    }
}

impl OtaError {
    /// Check result announcing a session this error aborted.
    pub fn check_result(self) -> Option<CheckResult> {
        match self {
            Self::Overflow => Some(CheckResult::FileError),
            Self::WriteFailed => Some(CheckResult::ReadError),
            Self::NoSession | Self::BadLength => None,
        }
    }
}

/// Why a session ended, reported to [`OtaPolicy::ota_stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaStopReason {
    Success,
    CrcError,
    Timeout,
    Disconnect,
    /// A new request arrived while the session was running.
    Superseded,
    FileError,
    WriteError,
}

// ── Wire types ───────────────────────────────────────────────

/// File description from the peer's OTA request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u32,
    pub crc32: u32,
    pub version: String<VERSION_MAX>,
}

impl FileInfo {
    /// `size u32 BE | crc32 u32 BE | version_len u8 | version`
    pub fn parse(payload: &[u8]) -> Result<Self, OtaError> {
        if payload.len() < 9 {
            return Err(OtaError::BadLength);
        }
        let size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let crc32 = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let vlen = payload[8] as usize;
        let raw = payload.get(9..9 + vlen).ok_or(OtaError::BadLength)?;
        let text = core::str::from_utf8(raw).map_err(|_| OtaError::BadLength)?;
        let version = String::try_from(text).map_err(|_| OtaError::BadLength)?;
        Ok(Self { size, crc32, version })
    }
}

/// Parameters of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub resume: bool,
    pub packages_per_loop: u8,
    pub package_size: u8,
    pub retry_timeout_secs: u8,
    pub reboot_timeout_secs: u8,
    /// Page-aligned byte count already on flash.
    pub start_offset: u32,
    pub package_interval: u8,
}

/// Outcome of the post-transfer image check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckResult {
    Valid = 0x80,
    CrcError = 0x01,
    ReadError = 0x02,
    FileError = 0x03,
}

/// Uplink produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaReply {
    Accepted(Accepted),
    Denied(OtaDenyReason),
    /// Last in-order sequence and the bytes received up to it.
    Progress { seq: u8, received: u32 },
    Check(CheckResult),
}

impl OtaReply {
    pub fn uplink_type(&self) -> UplinkType {
        match self {
            Self::Accepted(_) | Self::Denied(_) => UplinkType::OtaReply,
            Self::Progress { .. } => UplinkType::OtaDataReply,
            Self::Check(_) => UplinkType::OtaCheckResult,
        }
    }

    pub fn encode(&self) -> Vec<u8, 16> {
        let mut buf = [0u8; 16];
        let len = match self {
            Self::Accepted(a) => {
                buf[0] = 0x01 | if a.resume { 0x02 } else { 0x00 };
                buf[1] = a.packages_per_loop;
                buf[2] = a.package_size;
                buf[3] = a.retry_timeout_secs;
                buf[4] = a.reboot_timeout_secs;
                let mut n = 5;
                if a.resume {
                    buf[5..9].copy_from_slice(&a.start_offset.to_be_bytes());
                    n = 9;
                }
                buf[n] = a.package_interval;
                n + 1
            }
            Self::Denied(reason) => {
                buf[1] = *reason as u8;
                2
            }
            Self::Progress { seq, received } => {
                buf[0] = *seq;
                buf[1..5].copy_from_slice(&received.to_be_bytes());
                5
            }
            Self::Check(result) => {
                buf[0] = *result as u8;
                1
            }
        };
        Vec::from_slice(&buf[..len]).unwrap_or_default()
    }
}

// ── Resume record ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeRecord {
    magic: u32,
    file_size: u32,
    file_crc: u32,
    received: u32,
}

fn read_record<F: FlashPort>(flash: &F, addr: u32) -> Option<ResumeRecord> {
    let mut buf = [0u8; RECORD_BUF];
    flash.read_at(addr, &mut buf).ok()?;
    postcard::from_bytes::<ResumeRecord>(&buf)
        .ok()
        .filter(|r| r.magic == RESUME_MAGIC)
}

fn write_record<F: FlashPort>(flash: &mut F, addr: u32, rec: &ResumeRecord) -> Result<(), StorageError> {
    let mut buf = [0u8; RECORD_BUF];
    let bytes = postcard::to_slice(rec, &mut buf).map_err(|_| StorageError::Corrupted)?;
    flash.erase(addr, PAGE_SIZE as u32)?;
    flash.program(addr, bytes)
}

fn clear_record<F: FlashPort>(flash: &mut F, addr: u32) {
    if let Err(e) = flash.erase(addr, PAGE_SIZE as u32) {
        warn!("ota: resume record erase failed: {e}");
    }
}

// ── Session ──────────────────────────────────────────────────

struct Session {
    file: FileInfo,
    loop_len: u8,
    next_seq: u8,
    /// Bytes accepted so far (flushed + staged).
    received: u32,
    /// Bytes on flash.
    flushed: u32,
    staging: Vec<u8, PAGE_SIZE>,
    timeout_cnt: u8,
    last_ack: (u8, u32),
    replied_this_loop: bool,
}

impl Session {
    fn flush<F: FlashPort>(&mut self, flash: &mut F, base: u32) -> Result<(), StorageError> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let addr = base + self.flushed;
        flash.erase(addr, PAGE_SIZE as u32)?;
        flash.program(addr, &self.staging)?;
        self.flushed += self.staging.len() as u32;
        self.staging.clear();
        Ok(())
    }

    fn record(&self, received: u32) -> ResumeRecord {
        ResumeRecord {
            magic: RESUME_MAGIC,
            file_size: self.file.size,
            file_crc: self.file.crc32,
            received,
        }
    }

    fn progress(&self) -> OtaReply {
        OtaReply::Progress {
            seq: self.last_ack.0,
            received: self.last_ack.1,
        }
    }
}

// ── Engine ───────────────────────────────────────────────────

/// OTA transfer state machine; holds at most one session.
#[derive(Default)]
pub struct OtaEngine {
    session: Option<Session>,
}

impl OtaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// `(received, file_size)` of the running session.
    pub fn progress(&self) -> Option<(u32, u32)> {
        self.session.as_ref().map(|s| (s.received, s.file.size))
    }

    /// Handle an OTA request. Denials are replies, not errors.
    pub fn on_request<P>(
        &mut self,
        p: &mut P,
        cfg: &OtaConfig,
        mtu: u16,
        payload: &[u8],
    ) -> Result<OtaReply, OtaError>
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        let file = FileInfo::parse(payload)?;
        if self.session.is_some() {
            warn!("ota: new request replaces running session");
            self.abort(p, cfg, OtaStopReason::Superseded);
        }

        let verdict = if !cfg.enabled {
            OtaVerdict::Deny(OtaDenyReason::Disabled)
        } else if file.size == 0 || file.size > cfg.image_capacity {
            OtaVerdict::Deny(OtaDenyReason::FileTooLarge)
        } else {
            p.allow_ota(&file)
        };
        if let OtaVerdict::Deny(reason) = verdict {
            info!("ota: request for {} bytes denied ({:?})", file.size, reason);
            return Ok(OtaReply::Denied(reason));
        }

        let start = if cfg.resume {
            match read_record(p, cfg.resume_record_addr) {
                Some(r) if r.file_size == file.size && r.file_crc == file.crc32 => {
                    let aligned = r.received - r.received % PAGE_SIZE as u32;
                    if aligned < file.size { aligned } else { 0 }
                }
                _ => 0,
            }
        } else {
            0
        };

        if p.arm(cfg.retry_timeout_secs).is_err() {
            warn!("ota: retry timer unavailable");
            return Ok(OtaReply::Denied(OtaDenyReason::Busy));
        }

        let budget = usize::from(mtu).saturating_sub(BASE_HEADER_LEN + 1);
        let package_size = (cfg.package_size as usize).min(budget) as u8;
        let loop_len = cfg.packages_per_loop;

        info!(
            "ota: accepted {} bytes v{} from offset {}",
            file.size, file.version, start
        );
        p.ota_started(&file);
        self.session = Some(Session {
            file,
            loop_len,
            next_seq: 0,
            received: start,
            flushed: start,
            staging: Vec::new(),
            timeout_cnt: 0,
            last_ack: (loop_len - 1, start),
            replied_this_loop: false,
        });

        Ok(OtaReply::Accepted(Accepted {
            resume: cfg.resume,
            packages_per_loop: loop_len,
            package_size,
            retry_timeout_secs: cfg.retry_timeout_secs,
            reboot_timeout_secs: cfg.reboot_timeout_secs,
            start_offset: start,
            package_interval: cfg.package_interval,
        }))
    }

    /// Handle one `[seq][data]` package.
    pub fn on_package<P>(
        &mut self,
        p: &mut P,
        cfg: &OtaConfig,
        payload: &[u8],
    ) -> Result<Option<OtaReply>, OtaError>
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        let Some(s) = self.session.as_mut() else {
            return Err(OtaError::NoSession);
        };
        let Some((&seq, data)) = payload.split_first() else {
            return Err(OtaError::BadLength);
        };

        if seq != s.next_seq {
            if s.replied_this_loop {
                return Ok(None);
            }
            s.replied_this_loop = true;
            if p.arm(cfg.retry_timeout_secs).is_err() {
                warn!("ota: retry timer rearm failed");
            }
            warn!("ota: seq {} out of order, expected {}", seq, s.next_seq);
            return Ok(Some(s.progress()));
        }

        if s.received as usize + data.len() > s.file.size as usize {
            self.abort(p, cfg, OtaStopReason::FileError);
            return Err(OtaError::Overflow);
        }

        let mut rest = data;
        let mut flush_failed = false;
        while !rest.is_empty() {
            let room = PAGE_SIZE - s.staging.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            // room was checked above
            let _ = s.staging.extend_from_slice(now);
            rest = later;
            if s.staging.is_full() {
                let flushed = s.flush(p, cfg.image_base).and_then(|()| {
                    if cfg.resume {
                        write_record(p, cfg.resume_record_addr, &s.record(s.flushed))
                    } else {
                        Ok(())
                    }
                });
                if let Err(e) = flushed {
                    warn!("ota: flash write failed: {e}");
                    flush_failed = true;
                    break;
                }
            }
        }
        if flush_failed {
            self.abort(p, cfg, OtaStopReason::WriteError);
            return Err(OtaError::WriteFailed);
        }

        s.received += data.len() as u32;
        s.timeout_cnt = 0;
        s.last_ack = (seq, s.received);

        if s.received == s.file.size {
            return Ok(Some(self.finish(p, cfg)));
        }

        if p.arm(cfg.retry_timeout_secs).is_err() {
            warn!("ota: retry timer rearm failed");
        }
        if seq + 1 >= s.loop_len {
            s.next_seq = 0;
            s.replied_this_loop = false;
            return Ok(Some(s.progress()));
        }
        s.next_seq = seq + 1;
        Ok(None)
    }

    /// Peer signalled the end of the file.
    pub fn on_end<P>(&mut self, p: &mut P, cfg: &OtaConfig) -> Result<OtaReply, OtaError>
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        if self.session.is_none() {
            return Err(OtaError::NoSession);
        }
        Ok(self.finish(p, cfg))
    }

    /// Retry timer fired with no progress.
    pub fn on_timer<P>(&mut self, p: &mut P, cfg: &OtaConfig) -> Option<OtaReply>
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        let s = self.session.as_mut()?;
        s.timeout_cnt += 1;
        if s.timeout_cnt >= cfg.max_retry {
            warn!("ota: {} silent retry periods, giving up", s.timeout_cnt);
            self.abort(p, cfg, OtaStopReason::Timeout);
            return None;
        }
        s.replied_this_loop = true;
        if p.arm(cfg.retry_timeout_secs).is_err() {
            warn!("ota: retry timer rearm failed");
        }
        Some(s.progress())
    }

    /// Link dropped: keep what arrived for a later resume.
    pub fn on_disconnect<P>(&mut self, p: &mut P, cfg: &OtaConfig)
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        if self.session.is_some() {
            self.abort(p, cfg, OtaStopReason::Disconnect);
        }
    }

    /// End the session without an image check.
    fn abort<P>(&mut self, p: &mut P, cfg: &OtaConfig, reason: OtaStopReason)
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        p.cancel();
        let Some(mut s) = self.session.take() else {
            return;
        };
        let keep = cfg.resume
            && matches!(
                reason,
                OtaStopReason::Disconnect | OtaStopReason::Timeout | OtaStopReason::Superseded
            );
        if keep {
            let saved = s
                .flush(p, cfg.image_base)
                .and_then(|()| write_record(p, cfg.resume_record_addr, &s.record(s.received)));
            match saved {
                Ok(()) => info!("ota: {} of {} bytes kept for resume", s.received, s.file.size),
                Err(e) => warn!("ota: resume state not saved: {e}"),
            }
        } else if cfg.resume {
            clear_record(p, cfg.resume_record_addr);
        }
        info!("ota: stopped ({:?})", reason);
        stop(p, reason);
    }

    /// Flush, verify the staged image and end the session.
    fn finish<P>(&mut self, p: &mut P, cfg: &OtaConfig) -> OtaReply
    where
        P: FlashPort + OtaTimerPort + OtaPolicy + EventSink,
    {
        p.cancel();
        let Some(mut s) = self.session.take() else {
            return OtaReply::Check(CheckResult::FileError);
        };
        if cfg.resume {
            clear_record(p, cfg.resume_record_addr);
        }
        if let Err(e) = s.flush(p, cfg.image_base) {
            warn!("ota: final flush failed: {e}");
            stop(p, OtaStopReason::WriteError);
            return OtaReply::Check(CheckResult::ReadError);
        }

        // reuse the staging buffer as the page-sized read window
        let mut page = s.staging;
        let (reason, result) = match image_crc(p, cfg.image_base, s.file.size, &mut page) {
            Err(e) => {
                warn!("ota: image read failed: {e}");
                (OtaStopReason::WriteError, CheckResult::ReadError)
            }
            Ok(crc) if crc != s.file.crc32 => {
                warn!("ota: crc {:#010x} != declared {:#010x}", crc, s.file.crc32);
                (OtaStopReason::CrcError, CheckResult::CrcError)
            }
            Ok(_) if !p.validate_file(s.file.size, &s.file.version) => {
                warn!("ota: image rejected by validator");
                (OtaStopReason::FileError, CheckResult::FileError)
            }
            Ok(_) => {
                info!("ota: image v{} verified", s.file.version);
                (OtaStopReason::Success, CheckResult::Valid)
            }
        };
        stop(p, reason);
        OtaReply::Check(result)
    }
}

fn stop<P: OtaPolicy + EventSink>(p: &mut P, reason: OtaStopReason) {
    p.ota_stopped(reason);
    p.emit(&LlsyncEvent::OtaStopped(reason));
}

/// CRC32 of the staged image, re-read from flash one page at a time.
fn image_crc<F: FlashPort>(
    flash: &F,
    base: u32,
    size: u32,
    page: &mut Vec<u8, PAGE_SIZE>,
) -> Result<u32, StorageError> {
    page.clear();
    // zero-filled window of full page length
    let _ = page.resize(PAGE_SIZE, 0);
    let mut hasher = crc32fast::Hasher::new();
    let mut offset = 0u32;
    while offset < size {
        let n = (size - offset).min(PAGE_SIZE as u32) as usize;
        flash.read_at(base + offset, &mut page[..n])?;
        hasher.update(&page[..n]);
        offset += n as u32;
    }
    Ok(hasher.finalize())
}

// ── Tests ────────────────────────────────────────────────────
