//! Bounds-checked decoding of variant buffers.

use super::{Variant, VariantType, ARRAY_FLAG, COUNT_OFFSET, SLOT_SIZE, TYPE_MASK, TYPE_OFFSET};
use crate::error::{Result, TailError};
use crate::types::{Filetime, Guid, Sid, SystemProperty};

/// Fixed SID header: revision, sub-authority count, 6-byte authority.
const SID_HEADER_SIZE: usize = 8;

/// Decoded, indexed array of typed fields.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantArray {
    values: Vec<Variant>,
}

impl VariantArray {
    /// Decode `property_count` slots from a rendered buffer.
    ///
    /// Pointers inside the buffer are absolute addresses and are rebased
    /// against the start of `buffer`, so the slice must be the same
    /// allocation the renderer wrote into.
    pub fn decode(buffer: &[u8], property_count: u32) -> Result<Self> {
        let count = property_count as usize;
        let slots_len = count
            .checked_mul(SLOT_SIZE)
            .ok_or_else(|| TailError::DecodeFault("property count overflows".into()))?;
        if slots_len > buffer.len() {
            return Err(TailError::DecodeFault(format!(
                "{} slots need {} bytes, buffer has {}",
                count,
                slots_len,
                buffer.len()
            )));
        }

        let reader = BufferReader::new(buffer);
        let mut values = Vec::with_capacity(count);
        for ordinal in 0..count {
            values.push(reader.slot(ordinal)?);
        }
        Ok(Self { values })
    }

    pub fn from_values(values: Vec<Variant>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variant> {
        self.values.iter()
    }

    pub fn field(&self, ordinal: usize) -> Result<&Variant> {
        self.values.get(ordinal).ok_or(TailError::IndexOutOfRange {
            ordinal,
            count: self.values.len(),
        })
    }

    pub fn system(&self, property: SystemProperty) -> Result<&Variant> {
        self.field(property.ordinal())
    }

    pub fn string(&self, ordinal: usize) -> Result<&str> {
        match self.field(ordinal)? {
            Variant::String(s) => Ok(s),
            other => Err(mismatch(ordinal, "string", other)),
        }
    }

    /// Any unsigned width, widened to `u64`.
    pub fn uint(&self, ordinal: usize) -> Result<u64> {
        match self.field(ordinal)? {
            Variant::Byte(v) => Ok(*v as u64),
            Variant::UInt16(v) => Ok(*v as u64),
            Variant::UInt32(v) | Variant::HexInt32(v) => Ok(*v as u64),
            Variant::UInt64(v) | Variant::HexInt64(v) => Ok(*v),
            other => Err(mismatch(ordinal, "unsigned integer", other)),
        }
    }

    /// Any signed width, widened to `i64`.
    pub fn int(&self, ordinal: usize) -> Result<i64> {
        match self.field(ordinal)? {
            Variant::SByte(v) => Ok(*v as i64),
            Variant::Int16(v) => Ok(*v as i64),
            Variant::Int32(v) => Ok(*v as i64),
            Variant::Int64(v) => Ok(*v),
            other => Err(mismatch(ordinal, "signed integer", other)),
        }
    }

    pub fn filetime(&self, ordinal: usize) -> Result<Filetime> {
        match self.field(ordinal)? {
            Variant::FileTime(ft) => Ok(*ft),
            other => Err(mismatch(ordinal, "filetime", other)),
        }
    }

    pub fn guid(&self, ordinal: usize) -> Result<Guid> {
        match self.field(ordinal)? {
            Variant::Guid(g) => Ok(*g),
            other => Err(mismatch(ordinal, "guid", other)),
        }
    }

    pub fn sid(&self, ordinal: usize) -> Result<&Sid> {
        match self.field(ordinal)? {
            Variant::Sid(s) => Ok(s),
            other => Err(mismatch(ordinal, "sid", other)),
        }
    }

    pub fn boolean(&self, ordinal: usize) -> Result<bool> {
        match self.field(ordinal)? {
            Variant::Boolean(b) => Ok(*b),
            other => Err(mismatch(ordinal, "boolean", other)),
        }
    }
}

fn mismatch(ordinal: usize, expected: &'static str, found: &Variant) -> TailError {
    TailError::TypeMismatch {
        ordinal,
        expected,
        found: found.variant_type(),
    }
}

/// Checked reads over one render buffer.
struct BufferReader<'a> {
    buffer: &'a [u8],
    base: u64,
}

impl<'a> BufferReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            base: buffer.as_ptr() as u64,
        }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| TailError::DecodeFault("offset overflows".into()))?;
        self.buffer.get(offset..end).ok_or_else(|| {
            TailError::DecodeFault(format!(
                "read of {} bytes at offset {} exceeds buffer of {}",
                len,
                offset,
                self.buffer.len()
            ))
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_at(&self, offset: usize) -> Result<u64> {
        let b = self.bytes(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Rebase an absolute pointer to an in-buffer offset.
    fn rebase(&self, ordinal: usize, pointer: u64) -> Result<usize> {
        let offset = pointer.checked_sub(self.base).ok_or_else(|| {
            TailError::DecodeFault(format!(
                "slot {} points before the buffer ({:#x} < {:#x})",
                ordinal, pointer, self.base
            ))
        })?;
        if offset >= self.buffer.len() as u64 {
            return Err(TailError::DecodeFault(format!(
                "slot {} points past the buffer (offset {}, length {})",
                ordinal,
                offset,
                self.buffer.len()
            )));
        }
        Ok(offset as usize)
    }

    fn slot(&self, ordinal: usize) -> Result<Variant> {
        let start = ordinal * SLOT_SIZE;
        let tag = self.u32_at(start + TYPE_OFFSET)?;
        let count = self.u32_at(start + COUNT_OFFSET)?;

        if tag & ARRAY_FLAG != 0 {
            return Err(TailError::DecodeFault(format!(
                "slot {} holds an array of {} (type {:#x})",
                ordinal, count, tag
            )));
        }
        let ty = VariantType::from_tag(tag & TYPE_MASK).ok_or_else(|| {
            TailError::DecodeFault(format!("slot {} has unknown type {}", ordinal, tag))
        })?;

        let raw = self.u64_at(start)?;
        let value = match ty {
            VariantType::Null => Variant::Null,
            VariantType::SByte => Variant::SByte(raw as u8 as i8),
            VariantType::Byte => Variant::Byte(raw as u8),
            VariantType::Int16 => Variant::Int16(raw as u16 as i16),
            VariantType::UInt16 => Variant::UInt16(raw as u16),
            VariantType::Int32 => Variant::Int32(raw as u32 as i32),
            VariantType::UInt32 => Variant::UInt32(raw as u32),
            VariantType::HexInt32 => Variant::HexInt32(raw as u32),
            VariantType::Int64 => Variant::Int64(raw as i64),
            VariantType::UInt64 => Variant::UInt64(raw),
            VariantType::HexInt64 => Variant::HexInt64(raw),
            VariantType::Boolean => Variant::Boolean(raw as u32 != 0),
            VariantType::FileTime => Variant::FileTime(Filetime(raw)),
            VariantType::String => Variant::String(self.string_at(ordinal, raw)?),
            VariantType::Guid => {
                let offset = self.rebase(ordinal, raw)?;
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(self.bytes(offset, 16)?);
                Variant::Guid(Guid(bytes))
            }
            VariantType::Sid => Variant::Sid(self.sid_at(ordinal, raw)?),
        };
        Ok(value)
    }

    fn string_at(&self, ordinal: usize, pointer: u64) -> Result<String> {
        let offset = self.rebase(ordinal, pointer)?;
        let tail = &self.buffer[offset..];
        let mut units = Vec::new();
        let mut terminated = false;
        for pair in tail.chunks_exact(2) {
            let unit = u16::from_le_bytes([pair[0], pair[1]]);
            if unit == 0 {
                terminated = true;
                break;
            }
            units.push(unit);
        }
        if !terminated {
            return Err(TailError::DecodeFault(format!(
                "string in slot {} is not terminated inside the buffer",
                ordinal
            )));
        }
        String::from_utf16(&units).map_err(|_| {
            TailError::DecodeFault(format!("string in slot {} is not valid UTF-16", ordinal))
        })
    }

    fn sid_at(&self, ordinal: usize, pointer: u64) -> Result<Sid> {
        let offset = self.rebase(ordinal, pointer)?;
        let header = self.bytes(offset, SID_HEADER_SIZE)?;
        let revision = header[0];
        let sub_count = header[1] as usize;
        let authority = header[2..8]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64);

        let subs = self.bytes(offset + SID_HEADER_SIZE, sub_count * 4)?;
        let sub_authorities = subs
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}
