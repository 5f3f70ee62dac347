//! wlog file header and log-pack header.

use crate::block::checksum;
use crate::wlog::record::{LogRecord, RECORD_SIZE};

/// Magic bytes identifying a wlog file: `"WLOG"`.
pub const MAGIC: [u8; 4] = *b"WLOG";

/// Current wlog format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the wlog file header. It occupies exactly one physical block on
/// disk, but the in-memory struct itself only needs this many bytes.
pub const FILE_HEADER_SIZE: usize = 52;

/// `sector_type` value identifying a log-pack header.
pub const SECTOR_TYPE_LOGPACK: u16 = 1;

/// Fixed portion of a log-pack header, before the inline record array.
pub const PACK_HEADER_FIXED_SIZE: usize = 28;

/// The `logpack_lsid` value used by the end-of-stream marker pack.
pub const END_OF_STREAM_LSID: u64 = u64::MAX;

/// How many [`LogRecord`]s fit in one physical block of size `pbs`.
#[must_use]
pub const fn max_records_in_one_pb(pbs: u32) -> u16 {
    if (pbs as usize) < PACK_HEADER_FIXED_SIZE {
        return 0;
    }
    (((pbs as usize - PACK_HEADER_FIXED_SIZE) / RECORD_SIZE) as u16).min(u16::MAX)
}

/// The per-device wlog file header: salt, physical block size, device UUID,
/// and the LSID range the stream covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WlogFileHeader {
    /// Device-wide checksum salt, mixed into every record checksum.
    pub salt: u32,
    /// Physical block size in bytes (must be a power-of-two multiple of
    /// [`crate::block::LB_SIZE`]).
    pub pbs: u32,
    /// Device UUID, carried as an opaque 16-byte value (not parsed as an
    /// RFC 4122 UUID — this format only round-trips it).
    pub uuid: [u8; 16],
    /// First LSID covered by this stream.
    pub begin_lsid: u64,
    /// One past the last LSID covered by this stream.
    pub end_lsid: u64,
}

impl WlogFileHeader {
    /// Serialize the header into a buffer of exactly `pbs` bytes (the
    /// header occupies one physical block; the remainder is zero padding).
    #[must_use]
    pub fn to_page(&self, pbs: u32) -> Vec<u8> {
        let mut page = vec![0u8; pbs as usize];
        page[0..4].copy_from_slice(&MAGIC);
        page[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // bytes 6..8 reserved
        page[8..12].copy_from_slice(&self.salt.to_le_bytes());
        page[12..16].copy_from_slice(&self.pbs.to_le_bytes());
        page[16..32].copy_from_slice(&self.uuid);
        page[32..40].copy_from_slice(&self.begin_lsid.to_le_bytes());
        page[40..48].copy_from_slice(&self.end_lsid.to_le_bytes());
        // checksum (bytes 48..52) computed over the page with itself zeroed,
        // then XORed with the salt, matching the log-pack header scheme.
        let body_checksum = checksum::checksum(0, &page);
        let final_checksum = body_checksum ^ self.salt;
        page[48..52].copy_from_slice(&final_checksum.to_le_bytes());
        page
    }

    /// Parse a header from a page of at least [`FILE_HEADER_SIZE`] bytes.
    pub fn from_page(page: &[u8]) -> Result<Self, HeaderError> {
        if page.len() < FILE_HEADER_SIZE {
            return Err(HeaderError::Truncated);
        }
        if page[0..4] != MAGIC {
            return Err(HeaderError::BadMagic);
        }
        let version = u16::from_le_bytes([page[4], page[5]]);
        if version != FORMAT_VERSION {
            return Err(HeaderError::BadVersion(version));
        }
        let salt = u32::from_le_bytes(page[8..12].try_into().unwrap_or_default());
        let pbs = u32::from_le_bytes(page[12..16].try_into().unwrap_or_default());
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&page[16..32]);
        let begin_lsid = u64::from_le_bytes(page[32..40].try_into().unwrap_or_default());
        let end_lsid = u64::from_le_bytes(page[40..48].try_into().unwrap_or_default());
        let stored_checksum = u32::from_le_bytes(page[48..52].try_into().unwrap_or_default());

        let mut zeroed = page[..pbs.max(FILE_HEADER_SIZE as u32) as usize].to_vec();
        if zeroed.len() < 52 {
            zeroed.resize(52, 0);
        }
        zeroed[48..52].fill(0);
        let computed = checksum::checksum(0, &zeroed) ^ salt;
        if computed != stored_checksum {
            return Err(HeaderError::BadChecksum {
                expected: stored_checksum,
                actual: computed,
            });
        }

        Ok(Self {
            salt,
            pbs,
            uuid,
            begin_lsid,
            end_lsid,
        })
    }
}

/// Errors parsing a wlog or log-pack header.
#[derive(Debug)]
pub enum HeaderError {
    Truncated,
    BadMagic,
    BadVersion(u16),
    BadChecksum { expected: u32, actual: u32 },
    BadSectorType(u16),
    TooManyRecords { n_records: u16, max: u16 },
    TooMuchPadding(u16),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "header buffer shorter than the fixed header size"),
            Self::BadMagic => write!(f, "bad wlog magic bytes"),
            Self::BadVersion(v) => write!(f, "unsupported wlog format version: {v}"),
            Self::BadChecksum { expected, actual } => {
                write!(f, "header checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")
            }
            Self::BadSectorType(t) => write!(f, "bad log-pack sector_type: {t}"),
            Self::TooManyRecords { n_records, max } => {
                write!(f, "log pack has {n_records} records, exceeding max {max} for this PB size")
            }
            Self::TooMuchPadding(n) => write!(f, "log pack declares {n} padding records, at most 1 allowed"),
        }
    }
}

impl std::error::Error for HeaderError {}

/// The per-pack header: a fixed 28-byte prefix followed by an inline array
/// of up to `max_records_in_one_pb(pbs)` [`LogRecord`]s, zero-padded to fill
/// one physical block.
#[derive(Debug, Clone)]
pub struct LogPackHeader {
    pub checksum: u32,
    pub total_io_size: u32,
    pub logpack_lsid: u64,
    pub n_padding: u16,
    pub records: Vec<LogRecord>,
}

impl LogPackHeader {
    /// The end-of-stream marker: `n_records = 0`, `logpack_lsid = u64::MAX`.
    #[must_use]
    pub const fn end_of_stream() -> Self {
        Self {
            checksum: 0,
            total_io_size: 0,
            logpack_lsid: END_OF_STREAM_LSID,
            n_padding: 0,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.records.is_empty() && self.logpack_lsid == END_OF_STREAM_LSID
    }

    /// Serialize into a buffer of exactly `pbs` bytes, computing and filling
    /// in the checksum field as the final step.
    pub fn to_page(&self, pbs: u32, salt: u32) -> Result<Vec<u8>, HeaderError> {
        let max = max_records_in_one_pb(pbs);
        if self.records.len() > max as usize {
            return Err(HeaderError::TooManyRecords {
                n_records: self.records.len() as u16,
                max,
            });
        }
        if self.n_padding > 1 {
            return Err(HeaderError::TooMuchPadding(self.n_padding));
        }

        let mut page = vec![0u8; pbs as usize];
        page[4..6].copy_from_slice(&SECTOR_TYPE_LOGPACK.to_le_bytes());
        page[8..12].copy_from_slice(&self.total_io_size.to_le_bytes());
        page[12..20].copy_from_slice(&self.logpack_lsid.to_le_bytes());
        page[20..22].copy_from_slice(&(self.records.len() as u16).to_le_bytes());
        page[22..24].copy_from_slice(&self.n_padding.to_le_bytes());

        let mut off = PACK_HEADER_FIXED_SIZE;
        for rec in &self.records {
            page[off..off + RECORD_SIZE].copy_from_slice(&rec.to_bytes());
            off += RECORD_SIZE;
        }

        // checksum field (bytes 0..4) is zeroed above; compute over the
        // whole PB, then XOR with salt.
        let body = checksum::checksum(0, &page);
        let final_checksum = body ^ salt;
        page[0..4].copy_from_slice(&final_checksum.to_le_bytes());
        Ok(page)
    }

    /// Parse a pack header from a page of exactly `pbs` bytes.
    pub fn from_page(page: &[u8], pbs: u32, salt: u32) -> Result<Self, HeaderError> {
        if page.len() < PACK_HEADER_FIXED_SIZE {
            return Err(HeaderError::Truncated);
        }
        let stored_checksum = u32::from_le_bytes(page[0..4].try_into().unwrap_or_default());
        let sector_type = u16::from_le_bytes([page[4], page[5]]);
        let logpack_lsid = u64::from_le_bytes(page[12..20].try_into().unwrap_or_default());
        let n_records = u16::from_le_bytes([page[20], page[21]]);
        let n_padding = u16::from_le_bytes([page[22], page[23]]);

        // The end-of-stream marker is recognized before validating
        // sector_type/checksum against a full pack, since a writer may emit
        // it as an all-zero page plus the LSID sentinel.
        if n_records == 0 && logpack_lsid == END_OF_STREAM_LSID {
            return Ok(Self::end_of_stream());
        }

        if sector_type != SECTOR_TYPE_LOGPACK {
            return Err(HeaderError::BadSectorType(sector_type));
        }
        let max = max_records_in_one_pb(pbs);
        if n_records > max {
            return Err(HeaderError::TooManyRecords { n_records, max });
        }
        if n_padding > 1 {
            return Err(HeaderError::TooMuchPadding(n_padding));
        }

        let mut zeroed = page.to_vec();
        zeroed[0..4].fill(0);
        let computed = checksum::checksum(0, &zeroed) ^ salt;
        if computed != stored_checksum {
            return Err(HeaderError::BadChecksum {
                expected: stored_checksum,
                actual: computed,
            });
        }

        let total_io_size = u32::from_le_bytes(page[8..12].try_into().unwrap_or_default());

        let mut records = Vec::with_capacity(n_records as usize);
        let mut off = PACK_HEADER_FIXED_SIZE;
        for _ in 0..n_records {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(&page[off..off + RECORD_SIZE]);
            records.push(LogRecord::from_bytes(&buf));
            off += RECORD_SIZE;
        }

        Ok(Self {
            checksum: stored_checksum,
            total_io_size,
            logpack_lsid,
            n_padding,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wlog::record::RecordFlags;

    #[test]
    fn file_header_roundtrip() {
        let header = WlogFileHeader {
            salt: 0x1234_5678,
            pbs: 4096,
            uuid: [7u8; 16],
            begin_lsid: 10,
            end_lsid: 20,
        };
        let page = header.to_page(4096);
        let decoded = WlogFileHeader::from_page(&page).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn file_header_bad_magic_is_rejected() {
        let header = WlogFileHeader {
            salt: 1,
            pbs: 4096,
            uuid: [0; 16],
            begin_lsid: 0,
            end_lsid: 0,
        };
        let mut page = header.to_page(4096);
        page[0] = b'X';
        assert!(matches!(
            WlogFileHeader::from_page(&page),
            Err(HeaderError::BadMagic)
        ));
    }

    #[test]
    fn file_header_bit_flip_breaks_checksum() {
        let header = WlogFileHeader {
            salt: 99,
            pbs: 4096,
            uuid: [0; 16],
            begin_lsid: 0,
            end_lsid: 5,
        };
        let mut page = header.to_page(4096);
        page[33] ^= 0xFF;
        assert!(matches!(
            WlogFileHeader::from_page(&page),
            Err(HeaderError::BadChecksum { .. })
        ));
    }

    #[test]
    fn pack_header_roundtrip() {
        let pbs = 512;
        let salt = 0xCAFE;
        let pack = LogPackHeader {
            checksum: 0,
            total_io_size: 3,
            logpack_lsid: 42,
            n_padding: 0,
            records: vec![LogRecord {
                checksum: 0,
                lsid: 43,
                lsid_local: 1,
                flags: RecordFlags::EXIST,
                offset: 0,
                io_size: 8,
            }],
        };
        let page = pack.to_page(pbs, salt).unwrap();
        let decoded = LogPackHeader::from_page(&page, pbs, salt).unwrap();
        assert_eq!(decoded.logpack_lsid, 42);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].lsid, 43);
    }

    #[test]
    fn end_of_stream_roundtrips() {
        let pbs = 512;
        let salt = 1;
        let page = LogPackHeader::end_of_stream().to_page(pbs, salt).unwrap();
        let decoded = LogPackHeader::from_page(&page, pbs, salt).unwrap();
        assert!(decoded.is_end_of_stream());
    }

    #[test]
    fn max_records_matches_pb_arithmetic() {
        assert_eq!(max_records_in_one_pb(4096), ((4096 - 28) / 32) as u16);
        assert_eq!(max_records_in_one_pb(0), 0);
    }
}
