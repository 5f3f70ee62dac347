//! A single wdiff record: one address range and how to materialize it.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in a diff record's `flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiffFlags: u8 {
        /// The record is live (not a hole left by map compaction).
        const EXIST = 0x01;
        /// The payload is all zero; no bytes are stored on disk.
        const ALLZERO = 0x02;
        /// The record represents a discard; carries no payload.
        const DISCARD = 0x04;
    }
}

impl DiffFlags {
    #[must_use]
    pub const fn is_well_formed(self) -> bool {
        self.contains(Self::EXIST) && !(self.contains(Self::ALLZERO) && self.contains(Self::DISCARD))
    }

    #[must_use]
    pub const fn carries_payload(self) -> bool {
        !self.contains(Self::ALLZERO) && !self.contains(Self::DISCARD)
    }
}

/// How a record's payload is stored in the pack body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Snappy,
}

impl CompressionType {
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Snappy => 1,
        }
    }

    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Snappy),
            _ => None,
        }
    }
}

/// Size of a serialized [`DiffRecord`] in bytes.
pub const RECORD_SIZE: usize = 32;

/// One diff record: the address range it covers, where its payload lives
/// within the pack body, and how that payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffRecord {
    pub io_address: u64,
    pub io_blocks: u32,
    pub flags: DiffFlags,
    pub compression: CompressionType,
    /// Byte offset of this record's payload within the pack body.
    pub data_offset: u32,
    /// Length of the (possibly compressed) payload in bytes.
    pub data_size: u32,
    /// Checksum of the *uncompressed* payload.
    pub checksum: u32,
}

impl DiffRecord {
    #[must_use]
    pub const fn end_address(&self) -> u64 {
        self.io_address + self.io_blocks as u64
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.io_address.to_le_bytes());
        buf[8..12].copy_from_slice(&self.io_blocks.to_le_bytes());
        buf[12] = self.flags.bits();
        buf[13] = self.compression.to_u8();
        buf[16..20].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[20..24].copy_from_slice(&self.data_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Option<Self> {
        let io_address = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let io_blocks = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let flags = DiffFlags::from_bits_truncate(buf[12]);
        let compression = CompressionType::from_u8(buf[13])?;
        let data_offset = u32::from_le_bytes(buf[16..20].try_into().ok()?);
        let data_size = u32::from_le_bytes(buf[20..24].try_into().ok()?);
        let checksum = u32::from_le_bytes(buf[24..28].try_into().ok()?);
        Some(Self {
            io_address,
            io_blocks,
            flags,
            compression,
            data_offset,
            data_size,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let rec = DiffRecord {
            io_address: 12345,
            io_blocks: 8,
            flags: DiffFlags::EXIST,
            compression: CompressionType::Snappy,
            data_offset: 4096,
            data_size: 512,
            checksum: 0xABCD_1234,
        };
        let bytes = rec.to_bytes();
        let decoded = DiffRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn allzero_and_discard_carry_no_payload() {
        assert!(!(DiffFlags::EXIST | DiffFlags::ALLZERO).carries_payload());
        assert!(!(DiffFlags::EXIST | DiffFlags::DISCARD).carries_payload());
        assert!(DiffFlags::EXIST.carries_payload());
    }

    #[test]
    fn allzero_and_discard_together_is_not_well_formed() {
        let both = DiffFlags::EXIST | DiffFlags::ALLZERO | DiffFlags::DISCARD;
        assert!(!both.is_well_formed());
    }
}
