//! Typed variant buffers.
//!
//! A values render produces a buffer of fixed 16-byte slots, one per
//! requested property, in ordinal order:
//!
//! ```text
//! 0        8        12       16
//! +--------+--------+--------+
//! | value  | count  | type   |
//! +--------+--------+--------+
//! ```
//!
//! Scalars live inline in the value field. Strings, GUIDs and SIDs store an
//! absolute address pointing further into the same buffer. Every such
//! pointer is rebased and bounds checked before it is read.

mod array;
mod decoder;
mod encode;

pub use array::VariantArray;
pub use decoder::{Probe, RenderContext, VariantDecoder};
pub use encode::VariantBufferBuilder;

use crate::types::{Filetime, Guid, Sid};

/// Size of one descriptor slot.
pub const SLOT_SIZE: usize = 16;
pub(crate) const COUNT_OFFSET: usize = 8;
pub(crate) const TYPE_OFFSET: usize = 12;
pub(crate) const TYPE_MASK: u32 = 0x7f;
pub(crate) const ARRAY_FLAG: u32 = 0x80;

/// Type tag of a variant slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VariantType {
    Null = 0,
    String = 1,
    SByte = 3,
    Byte = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    Boolean = 13,
    Guid = 15,
    FileTime = 17,
    Sid = 19,
    HexInt32 = 20,
    HexInt64 = 21,
}

impl VariantType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        let ty = match tag {
            0 => VariantType::Null,
            1 => VariantType::String,
            3 => VariantType::SByte,
            4 => VariantType::Byte,
            5 => VariantType::Int16,
            6 => VariantType::UInt16,
            7 => VariantType::Int32,
            8 => VariantType::UInt32,
            9 => VariantType::Int64,
            10 => VariantType::UInt64,
            13 => VariantType::Boolean,
            15 => VariantType::Guid,
            17 => VariantType::FileTime,
            19 => VariantType::Sid,
            20 => VariantType::HexInt32,
            21 => VariantType::HexInt64,
            _ => return None,
        };
        Some(ty)
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// One decoded field.
#[derive(Clone, Debug, PartialEq)]
pub enum Variant {
    Null,
    String(String),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Boolean(bool),
    Guid(Guid),
    FileTime(Filetime),
    Sid(Sid),
    HexInt32(u32),
    HexInt64(u64),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Null => VariantType::Null,
            Variant::String(_) => VariantType::String,
            Variant::SByte(_) => VariantType::SByte,
            Variant::Byte(_) => VariantType::Byte,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::Guid(_) => VariantType::Guid,
            Variant::FileTime(_) => VariantType::FileTime,
            Variant::Sid(_) => VariantType::Sid,
            Variant::HexInt32(_) => VariantType::HexInt32,
            Variant::HexInt64(_) => VariantType::HexInt64,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }
}
