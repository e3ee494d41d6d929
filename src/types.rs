//! Core value types shared by the tailing engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque native handle value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(pub u64);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// Status code reported by the native event log service (Win32 numbering).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const FILE_NOT_FOUND: StatusCode = StatusCode(2);
    pub const ACCESS_DENIED: StatusCode = StatusCode(5);
    pub const INVALID_HANDLE: StatusCode = StatusCode(6);
    pub const INVALID_DATA: StatusCode = StatusCode(13);
    pub const NOT_SUPPORTED: StatusCode = StatusCode(50);
    pub const INVALID_PARAMETER: StatusCode = StatusCode(87);
    pub const INSUFFICIENT_BUFFER: StatusCode = StatusCode(122);
    pub const NO_MORE_ITEMS: StatusCode = StatusCode(259);
    pub const NOT_FOUND: StatusCode = StatusCode(1168);
    pub const CANCELLED: StatusCode = StatusCode(1223);
    pub const TIMEOUT: StatusCode = StatusCode(1460);
    pub const RPC_CALL_CANCELLED: StatusCode = StatusCode(1818);
    pub const EVT_INVALID_QUERY: StatusCode = StatusCode(15001);
    pub const EVT_PUBLISHER_METADATA_NOT_FOUND: StatusCode = StatusCode(15002);
    pub const EVT_CHANNEL_NOT_FOUND: StatusCode = StatusCode(15007);
    pub const EVT_QUERY_RESULT_STALE: StatusCode = StatusCode(15011);
    pub const EVT_MESSAGE_NOT_FOUND: StatusCode = StatusCode(15027);
    pub const EVT_MESSAGE_ID_NOT_FOUND: StatusCode = StatusCode(15028);

    fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            2 => "file not found",
            5 => "access denied",
            6 => "invalid handle",
            13 => "invalid data",
            50 => "not supported",
            87 => "invalid parameter",
            122 => "insufficient buffer",
            259 => "no more items",
            1168 => "not found",
            1223 => "cancelled",
            1460 => "timeout",
            1818 => "remote call cancelled",
            15001 => "invalid query",
            15002 => "publisher metadata not found",
            15007 => "channel not found",
            15011 => "query result stale",
            15027 => "message not found",
            15028 => "message id not found",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({})", self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Number of 100ns ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

pub(crate) const TICKS_PER_SECOND: u64 = 10_000_000;

/// 100-nanosecond intervals since 1601-01-01T00:00:00Z.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Filetime(pub u64);

impl Filetime {
    /// Convert to a calendar timestamp.
    ///
    /// Exact over the whole `u64` range: whole seconds and the sub-second
    /// remainder are split with integer division before applying the epoch
    /// offset.
    pub fn to_datetime(self) -> DateTime<Utc> {
        let secs = (self.0 / TICKS_PER_SECOND) as i64;
        let nanos = ((self.0 % TICKS_PER_SECOND) * 100) as u32;
        let unix_secs = secs - (UNIX_EPOCH_TICKS / TICKS_PER_SECOND) as i64;
        DateTime::<Utc>::from_timestamp(unix_secs, nanos).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Convert from a calendar timestamp. Instants before 1601 clamp to zero.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let unix_ticks = at.timestamp() as i128 * TICKS_PER_SECOND as i128
            + (at.timestamp_subsec_nanos() / 100) as i128;
        let ticks = unix_ticks + UNIX_EPOCH_TICKS as i128;
        Filetime(ticks.clamp(0, u64::MAX as i128) as u64)
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }
}

impl fmt::Debug for Filetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filetime({})", self.0)
    }
}

/// A 128-bit GUID in its native mixed-endian byte layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&data3.to_le_bytes());
        bytes[8..16].copy_from_slice(&data4);
        Guid(bytes)
    }

    fn data1(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    fn data2(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    fn data3(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1(),
            self.data2(),
            self.data3(),
            d[8],
            d[9],
            d[10],
            d[11],
            d[12],
            d[13],
            d[14],
            d[15]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// A security identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    pub revision: u8,
    /// 48-bit identifier authority.
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({})", self)
    }
}

/// Ordinals of the system properties extracted by a system render context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum SystemProperty {
    ProviderName = 0,
    ProviderGuid,
    EventId,
    Qualifiers,
    Level,
    Task,
    Opcode,
    Keywords,
    TimeCreated,
    EventRecordId,
    ActivityId,
    RelatedActivityId,
    ProcessId,
    ThreadId,
    Channel,
    Computer,
    UserId,
    Version,
}

impl SystemProperty {
    /// Number of system property slots.
    pub const COUNT: usize = 18;

    pub const ALL: [SystemProperty; SystemProperty::COUNT] = [
        SystemProperty::ProviderName,
        SystemProperty::ProviderGuid,
        SystemProperty::EventId,
        SystemProperty::Qualifiers,
        SystemProperty::Level,
        SystemProperty::Task,
        SystemProperty::Opcode,
        SystemProperty::Keywords,
        SystemProperty::TimeCreated,
        SystemProperty::EventRecordId,
        SystemProperty::ActivityId,
        SystemProperty::RelatedActivityId,
        SystemProperty::ProcessId,
        SystemProperty::ThreadId,
        SystemProperty::Channel,
        SystemProperty::Computer,
        SystemProperty::UserId,
        SystemProperty::Version,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }
}
