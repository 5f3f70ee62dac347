//! wdiff pack framing: a header naming how many records follow, the
//! records themselves, then their payload bytes concatenated in order.

use crate::block::checksum;
use crate::wdiff::record::{DiffRecord, RECORD_SIZE};

/// Fixed portion of a pack header, before the inline record array.
pub const PACK_HEADER_FIXED_SIZE: usize = 16;

/// A decoded pack: its records plus the payload bytes belonging to each
/// (already concatenated in the order records were read; an empty `Vec`
/// for `ALLZERO`/`DISCARD` records).
#[derive(Debug)]
pub struct Pack {
    pub records: Vec<DiffRecord>,
    /// Raw payload bytes, `data_size` bytes per payload-carrying record, in
    /// the same order as `records`. Still compressed if the record's
    /// `compression` is not `None` — decompression happens one layer up.
    pub payloads: Vec<Vec<u8>>,
}

impl Pack {
    /// Encode this pack: fixed header, record array, then concatenated
    /// payload bytes. `payloads[i]` must already equal `records[i].data_size`
    /// bytes (the caller is responsible for compressing beforehand).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for rec in &self.records {
            body.extend_from_slice(&rec.to_bytes());
        }
        let records_len = body.len();
        for payload in &self.payloads {
            body.extend_from_slice(payload);
        }

        let total_size: u32 = self.payloads.iter().map(|p| p.len() as u32).sum();
        let checksum = checksum::checksum(0, &body);

        let mut out = Vec::with_capacity(PACK_HEADER_FIXED_SIZE + body.len());
        out.extend_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        out.extend_from_slice(&total_size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&body);
        let _ = records_len;
        out
    }

    /// Read the fixed header from `header_buf` (exactly
    /// [`PACK_HEADER_FIXED_SIZE`] bytes), returning how many record and
    /// payload bytes the caller must read next.
    pub fn parse_header(header_buf: &[u8; PACK_HEADER_FIXED_SIZE]) -> PackHeaderInfo {
        let checksum = u32::from_le_bytes(header_buf[0..4].try_into().unwrap_or_default());
        let n_records = u32::from_le_bytes(header_buf[4..8].try_into().unwrap_or_default());
        let total_size = u32::from_le_bytes(header_buf[8..12].try_into().unwrap_or_default());
        PackHeaderInfo {
            checksum,
            n_records,
            total_size,
        }
    }

    /// Reconstruct a [`Pack`] from the records+payload body read after the
    /// fixed header, verifying the pack-level checksum.
    pub fn from_body(info: &PackHeaderInfo, body: &[u8]) -> Result<Self, PackError> {
        let computed = checksum::checksum(0, body);
        if computed != info.checksum {
            return Err(PackError::BadChecksum {
                expected: info.checksum,
                actual: computed,
            });
        }

        let records_len = info.n_records as usize * RECORD_SIZE;
        if body.len() < records_len {
            return Err(PackError::Truncated);
        }
        let mut records = Vec::with_capacity(info.n_records as usize);
        for i in 0..info.n_records as usize {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(&body[i * RECORD_SIZE..(i + 1) * RECORD_SIZE]);
            records.push(DiffRecord::from_bytes(&buf).ok_or(PackError::BadRecord)?);
        }

        let mut payloads = Vec::with_capacity(records.len());
        let mut offset = records_len;
        for rec in &records {
            let size = rec.data_size as usize;
            if !rec.flags.carries_payload() {
                payloads.push(Vec::new());
                continue;
            }
            if body.len() < offset + size {
                return Err(PackError::Truncated);
            }
            payloads.push(body[offset..offset + size].to_vec());
            offset += size;
        }

        Ok(Self { records, payloads })
    }
}

/// Parsed pack header fields, used to size the subsequent body read.
#[derive(Debug, Clone, Copy)]
pub struct PackHeaderInfo {
    pub checksum: u32,
    pub n_records: u32,
    pub total_size: u32,
}

impl PackHeaderInfo {
    /// Total byte length of the body (records + payload) this header
    /// describes.
    #[must_use]
    pub const fn body_len(&self) -> usize {
        self.n_records as usize * RECORD_SIZE + self.total_size as usize
    }
}

#[derive(Debug)]
pub enum PackError {
    BadChecksum { expected: u32, actual: u32 },
    Truncated,
    BadRecord,
}

impl std::fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadChecksum { expected, actual } => {
                write!(f, "pack checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")
            }
            Self::Truncated => write!(f, "pack body shorter than its header declares"),
            Self::BadRecord => write!(f, "unrecognized compression type in pack record"),
        }
    }
}

impl std::error::Error for PackError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wdiff::record::{CompressionType, DiffFlags};

    #[test]
    fn pack_roundtrip_with_mixed_records() {
        let pack = Pack {
            records: vec![
                DiffRecord {
                    io_address: 0,
                    io_blocks: 8,
                    flags: DiffFlags::EXIST,
                    compression: CompressionType::None,
                    data_offset: 0,
                    data_size: 4096,
                    checksum: 111,
                },
                DiffRecord {
                    io_address: 8,
                    io_blocks: 4,
                    flags: DiffFlags::EXIST | DiffFlags::ALLZERO,
                    compression: CompressionType::None,
                    data_offset: 0,
                    data_size: 0,
                    checksum: 0,
                },
            ],
            payloads: vec![vec![0xAB; 4096], Vec::new()],
        };

        let encoded = pack.to_bytes();
        let mut header_buf = [0u8; PACK_HEADER_FIXED_SIZE];
        header_buf.copy_from_slice(&encoded[..PACK_HEADER_FIXED_SIZE]);
        let info = Pack::parse_header(&header_buf);
        let body = &encoded[PACK_HEADER_FIXED_SIZE..PACK_HEADER_FIXED_SIZE + info.body_len()];

        let decoded = Pack::from_body(&info, body).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.payloads[0].len(), 4096);
        assert!(decoded.payloads[1].is_empty());
    }
}
