//! LLSync wire vocabulary.
//!
//! Every slice on the air starts with the same base header:
//!
//! ```text
//! ┌──────────┬───────────────────────────────┬──────────────┬─────────────┐
//! │ Type (1B)│ State(2b) | Length(14b) (BE)  │ Fixed header │ Payload     │
//! └──────────┴───────────────────────────────┴──────────────┴─────────────┘
//! ```
//!
//! The fixed header is repeated in every slice of a message and its length
//! depends on the message type *and* the direction, see [`header_len`].
//!
//! Type bytes are decoded once, at the router boundary, into the closed
//! [`Downlink`] enum. Outbound messages are described by [`UplinkType`].

/// Type byte plus the 2-byte length/state word.
pub const BASE_HEADER_LEN: usize = 3;

/// Largest fixed header of any message type.
pub const MAX_FIXED_HEADER: usize = 1;

/// Protocol version carried in the advertisement and the MTU report.
pub const PROTOCOL_VERSION: u8 = 2;

/// Seconds added to a peer timestamp before it is signed.
pub const EXPIRATION_SECS: u32 = 60;

const LENGTH_MASK: u16 = 0x3FFF;
const STATE_SHIFT: u16 = 14;

// ── Characteristics ──────────────────────────────────────────

/// 16-bit UUID of the LLSync primary service.
pub const SERVICE_UUID16: u16 = 0xFFE0;
/// 16-bit UUID of the notify characteristic all uplinks use.
pub const EVENT_UUID16: u16 = 0xFFE3;

/// Writable characteristics the transport tags inbound buffers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharId {
    /// Pre-bind flows: handshake, MTU, device info, dynreg.
    DeviceInfo,
    /// Post-bind data template traffic.
    Data,
    /// Firmware transfer.
    Ota,
    /// Sub-device control in gateway products.
    Gateway,
}

impl CharId {
    pub const fn uuid16(self) -> u16 {
        match self {
            Self::DeviceInfo => 0xFFE1,
            Self::Data => 0xFFE2,
            Self::Ota => 0xFFE4,
            Self::Gateway => 0xFFE5,
        }
    }

    pub fn from_uuid16(uuid: u16) -> Option<Self> {
        match uuid {
            0xFFE1 => Some(Self::DeviceInfo),
            0xFFE2 => Some(Self::Data),
            0xFFE4 => Some(Self::Ota),
            0xFFE5 => Some(Self::Gateway),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Peer → device.
    Downlink,
    /// Device → peer.
    Uplink,
}

// ── Slice state ──────────────────────────────────────────────

/// Position of a slice inside its message (top two bits of the length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceState {
    /// The whole message fits in one slice.
    NoSlice = 0b00,
    Head = 0b01,
    Body = 0b10,
    Tail = 0b11,
}

impl SliceState {
    /// Split the big-endian length word into `(state, length)`.
    pub fn unpack(word: u16) -> (Self, usize) {
        let state = match word >> STATE_SHIFT {
            0b00 => Self::NoSlice,
            0b01 => Self::Head,
            0b10 => Self::Body,
            _ => Self::Tail,
        };
        (state, (word & LENGTH_MASK) as usize)
    }

    /// Combine state and chunk length into the length word.
    pub fn pack(self, len: usize) -> u16 {
        ((self as u16) << STATE_SHIFT) | (len as u16 & LENGTH_MASK)
    }
}

// ── Downlink (peer → device) ─────────────────────────────────

/// Message types on the device-info characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceInfoType {
    SyncTime = 0,
    ConnValid = 1,
    BindSuccess = 2,
    BindFail = 3,
    Unbind = 4,
    ConnSuccess = 5,
    ConnFail = 6,
    UnbindSuccess = 7,
    UnbindFail = 8,
    SetMtuResult = 9,
    BindTimeout = 10,
    GetDevInfo = 11,
    DynRegRequest = 12,
    DynRegResult = 13,
}

impl DeviceInfoType {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::SyncTime,
            1 => Self::ConnValid,
            2 => Self::BindSuccess,
            3 => Self::BindFail,
            4 => Self::Unbind,
            5 => Self::ConnSuccess,
            6 => Self::ConnFail,
            7 => Self::UnbindSuccess,
            8 => Self::UnbindFail,
            9 => Self::SetMtuResult,
            10 => Self::BindTimeout,
            11 => Self::GetDevInfo,
            12 => Self::DynRegRequest,
            13 => Self::DynRegResult,
            _ => return None,
        })
    }
}

/// Data-template kinds; the type byte is `kind << 5 | id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataKind {
    ReportReply = 0,
    Control = 1,
    GetStatusReply = 2,
    Action = 3,
    EventReply = 4,
}

/// Message types on the OTA characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaType {
    Request = 0,
    Package = 1,
    End = 2,
}

/// Every inbound message, decoded once from `(characteristic, type byte)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downlink {
    DeviceInfo(DeviceInfoType),
    Data { kind: DataKind, id: u8 },
    Ota(OtaType),
    Gateway(u8),
    Unknown { char: CharId, type_byte: u8 },
}

impl Downlink {
    pub fn decode(char: CharId, type_byte: u8) -> Self {
        let unknown = Self::Unknown { char, type_byte };
        match char {
            CharId::DeviceInfo => DeviceInfoType::from_byte(type_byte).map_or(unknown, Self::DeviceInfo),
            CharId::Data => {
                let id = type_byte & 0x1F;
                let kind = match type_byte >> 5 {
                    0 => DataKind::ReportReply,
                    1 => DataKind::Control,
                    2 => DataKind::GetStatusReply,
                    3 => DataKind::Action,
                    4 => DataKind::EventReply,
                    _ => return unknown,
                };
                Self::Data { kind, id }
            }
            CharId::Ota => match type_byte {
                0 => Self::Ota(OtaType::Request),
                1 => Self::Ota(OtaType::Package),
                2 => Self::Ota(OtaType::End),
                _ => unknown,
            },
            CharId::Gateway => Self::Gateway(type_byte),
        }
    }
}

// ── Uplink (device → peer) ───────────────────────────────────

/// Outbound message types. Data-template kinds occupy the top three bits
/// and leave the low five for an event/action id; management replies live
/// in the `0xE0` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UplinkType {
    PropertyReport = 0x00,
    ControlReply = 0x20,
    GetStatus = 0x40,
    EventPost = 0x60,
    ActionReply = 0x80,
    BindSignRet = 0xE0,
    ConnSignRet = 0xE1,
    UnbindSignRet = 0xE2,
    ReportMtu = 0xE3,
    OtaReply = 0xE4,
    OtaDataReply = 0xE5,
    OtaCheckResult = 0xE6,
    SyncMtu = 0xE7,
    SyncWaitTime = 0xE8,
    DynRegSign = 0xE9,
}

impl UplinkType {
    /// Wire type byte; `id` only lands for event posts and action replies.
    pub fn type_byte(self, id: u8) -> u8 {
        match self {
            Self::EventPost | Self::ActionReply => self as u8 | (id & 0x1F),
            _ => self as u8,
        }
    }

    /// The only replies that may leave the device before the link is
    /// authenticated.
    pub fn allowed_before_auth(self) -> bool {
        matches!(
            self,
            Self::BindSignRet
                | Self::ConnSignRet
                | Self::UnbindSignRet
                | Self::DynRegSign
                | Self::ReportMtu
                | Self::SyncMtu
                | Self::SyncWaitTime
        )
    }
}

// ── Header table ─────────────────────────────────────────────

/// Fixed header length for an inbound message.
pub fn downlink_header_len(msg: Downlink) -> usize {
    match msg {
        // result code precedes the (possibly sliced) status TLV
        Downlink::Data {
            kind: DataKind::GetStatusReply,
            ..
        } => 1,
        _ => 0,
    }
}

/// Fixed header length for an outbound message.
pub fn uplink_header_len(ty: UplinkType) -> usize {
    match ty {
        // result code precedes the action output TLV
        UplinkType::ActionReply => 1,
        _ => 0,
    }
}

/// Total bytes preceding the payload chunk in every slice, keyed by
/// `(type, direction)`. Inbound types need the characteristic to decode.
pub fn header_len(direction: Direction, char: CharId, type_byte: u8) -> usize {
    let fixed = match direction {
        Direction::Downlink => downlink_header_len(Downlink::decode(char, type_byte)),
        Direction::Uplink => uplink_from_byte(type_byte).map_or(0, uplink_header_len),
    };
    BASE_HEADER_LEN + fixed
}

fn uplink_from_byte(b: u8) -> Option<UplinkType> {
    Some(match b {
        0xE0 => UplinkType::BindSignRet,
        0xE1 => UplinkType::ConnSignRet,
        0xE2 => UplinkType::UnbindSignRet,
        0xE3 => UplinkType::ReportMtu,
        0xE4 => UplinkType::OtaReply,
        0xE5 => UplinkType::OtaDataReply,
        0xE6 => UplinkType::OtaCheckResult,
        0xE7 => UplinkType::SyncMtu,
        0xE8 => UplinkType::SyncWaitTime,
        0xE9 => UplinkType::DynRegSign,
        _ => match b >> 5 {
            0 => UplinkType::PropertyReport,
            1 => UplinkType::ControlReply,
            2 => UplinkType::GetStatus,
            3 => UplinkType::EventPost,
            4 => UplinkType::ActionReply,
            _ => return None,
        },
    })
}

// ── Tests ────────────────────────────────────────────────────
