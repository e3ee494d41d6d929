//! Writer for the variant slot layout.

use super::{Variant, COUNT_OFFSET, SLOT_SIZE, TYPE_OFFSET};
use crate::native::{NativeError, NativeResult, RenderSize};

/// Builds a variant buffer in the same layout the decoder reads.
///
/// Pointers written into the buffer are absolute addresses of the target
/// allocation, so an encoded buffer is only decodable in place: moving a
/// `Vec` keeps its heap address, cloning it does not.
#[derive(Clone, Debug, Default)]
pub struct VariantBufferBuilder {
    values: Vec<Variant>,
}

impl VariantBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Variant>) -> Self {
        Self { values }
    }

    pub fn push(mut self, value: Variant) -> Self {
        self.values.push(value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total bytes needed for slots plus out-of-line data.
    pub fn required_size(&self) -> usize {
        self.values.len() * SLOT_SIZE + self.values.iter().map(payload_size).sum::<usize>()
    }

    /// Write into `buffer`, reporting the required size when it is too small.
    pub fn write(&self, buffer: &mut [u8]) -> NativeResult<RenderSize> {
        let required = self.required_size();
        let property_count = self.values.len() as u32;
        if buffer.len() < required {
            return Err(NativeError::InsufficientBuffer {
                required,
                property_count,
            });
        }

        self.write_slots(&mut buffer[..required]);
        Ok(RenderSize {
            buffer_used: required,
            property_count,
        })
    }

    /// Allocate an exactly sized buffer and write into it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.required_size()];
        self.write_slots(&mut buffer);
        buffer
    }

    /// `buffer` must hold at least `required_size()` bytes.
    fn write_slots(&self, buffer: &mut [u8]) {
        let base = buffer.as_ptr() as u64;
        let mut data_offset = self.values.len() * SLOT_SIZE;

        for (ordinal, value) in self.values.iter().enumerate() {
            let slot = ordinal * SLOT_SIZE;
            let inline = match value {
                Variant::Null => 0,
                Variant::SByte(v) => *v as u8 as u64,
                Variant::Byte(v) => *v as u64,
                Variant::Int16(v) => *v as u16 as u64,
                Variant::UInt16(v) => *v as u64,
                Variant::Int32(v) => *v as u32 as u64,
                Variant::UInt32(v) | Variant::HexInt32(v) => *v as u64,
                Variant::Int64(v) => *v as u64,
                Variant::UInt64(v) | Variant::HexInt64(v) => *v,
                Variant::Boolean(b) => *b as u64,
                Variant::FileTime(ft) => ft.0,
                Variant::String(_) | Variant::Guid(_) | Variant::Sid(_) => {
                    let pointer = base + data_offset as u64;
                    data_offset += write_payload(value, &mut buffer[data_offset..]);
                    pointer
                }
            };
            buffer[slot..slot + 8].copy_from_slice(&inline.to_le_bytes());
            buffer[slot + COUNT_OFFSET..slot + COUNT_OFFSET + 4].copy_from_slice(&0u32.to_le_bytes());
            buffer[slot + TYPE_OFFSET..slot + TYPE_OFFSET + 4]
                .copy_from_slice(&value.variant_type().tag().to_le_bytes());
        }
    }
}

fn payload_size(value: &Variant) -> usize {
    match value {
        Variant::String(s) => (s.encode_utf16().count() + 1) * 2,
        Variant::Guid(_) => 16,
        Variant::Sid(sid) => 8 + sid.sub_authorities.len() * 4,
        _ => 0,
    }
}

fn write_payload(value: &Variant, out: &mut [u8]) -> usize {
    match value {
        Variant::String(s) => {
            let mut written = 0;
            for unit in s.encode_utf16().chain(std::iter::once(0)) {
                out[written..written + 2].copy_from_slice(&unit.to_le_bytes());
                written += 2;
            }
            written
        }
        Variant::Guid(guid) => {
            out[..16].copy_from_slice(&guid.0);
            16
        }
        Variant::Sid(sid) => {
            out[0] = sid.revision;
            out[1] = sid.sub_authorities.len() as u8;
            out[2..8].copy_from_slice(&sid.authority.to_be_bytes()[2..8]);
            for (i, sub) in sid.sub_authorities.iter().enumerate() {
                let at = 8 + i * 4;
                out[at..at + 4].copy_from_slice(&sub.to_le_bytes());
            }
            8 + sid.sub_authorities.len() * 4
        }
        _ => 0,
    }
}
