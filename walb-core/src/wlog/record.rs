//! The 32-byte on-disk log record.

use bitflags::bitflags;

/// Size of a serialized [`LogRecord`] in bytes.
pub const RECORD_SIZE: usize = 32;

bitflags! {
    /// Flags carried in a log record's `flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u32 {
        /// The record is live (not a hole left by truncation).
        const EXIST = 0x01;
        /// The record carries payload blocks that are part of the log
        /// stream but correspond to no target IO (padding only).
        const PADDING = 0x02;
        /// The record represents a discard; carries no payload.
        const DISCARD = 0x04;
    }
}

impl RecordFlags {
    /// A record is well-formed only if `EXIST` is set and `PADDING`/`DISCARD`
    /// are not both set.
    #[must_use]
    pub const fn is_well_formed(self) -> bool {
        self.contains(Self::EXIST) && !(self.contains(Self::PADDING) && self.contains(Self::DISCARD))
    }

    #[must_use]
    pub const fn is_padding(self) -> bool {
        self.contains(Self::PADDING)
    }

    #[must_use]
    pub const fn is_discard(self) -> bool {
        self.contains(Self::DISCARD)
    }

    /// A "normal" record is neither padding nor discard.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        !self.is_padding() && !self.is_discard()
    }
}

/// A single log record: one IO (or padding/discard marker) within a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    /// Checksum of the record's payload blocks, mixed with the device salt.
    /// Unused (left as `0`) for discard and padding records.
    pub checksum: u32,
    /// Logical sequence number: `packLsid + lsid_local`.
    pub lsid: u64,
    /// Offset of this record within its pack.
    pub lsid_local: u32,
    /// Record flags.
    pub flags: RecordFlags,
    /// Target offset in logical blocks (meaningless for padding).
    pub offset: u64,
    /// IO size in logical blocks.
    pub io_size: u32,
}

impl LogRecord {
    #[must_use]
    pub const fn end_offset(&self) -> u64 {
        self.offset + self.io_size as u64
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[4..12].copy_from_slice(&self.lsid.to_le_bytes());
        buf[12..16].copy_from_slice(&self.lsid_local.to_le_bytes());
        buf[16..20].copy_from_slice(&self.io_size.to_le_bytes());
        buf[20..28].copy_from_slice(&self.offset.to_le_bytes());
        buf[28..32].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let checksum = u32::from_le_bytes(buf[0..4].try_into().unwrap_or_default());
        let lsid = u64::from_le_bytes(buf[4..12].try_into().unwrap_or_default());
        let lsid_local = u32::from_le_bytes(buf[12..16].try_into().unwrap_or_default());
        let io_size = u32::from_le_bytes(buf[16..20].try_into().unwrap_or_default());
        let offset = u64::from_le_bytes(buf[20..28].try_into().unwrap_or_default());
        let flags_bits = u32::from_le_bytes(buf[28..32].try_into().unwrap_or_default());
        Self {
            checksum,
            lsid,
            lsid_local,
            flags: RecordFlags::from_bits_truncate(flags_bits),
            offset,
            io_size,
        }
    }
}
