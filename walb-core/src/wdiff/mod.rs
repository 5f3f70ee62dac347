//! The wdiff (sparse block diff) format: records, file/pack framing, and a
//! streaming reader/writer. Payloads are stored snappy-compressed via
//! `snap::raw`, the same unframed API vector uses for its own payload
//! compression.

pub mod file;
pub mod pack;
pub mod reader;
pub mod record;
pub mod writer;

pub use file::WdiffFileHeader;
pub use pack::Pack;
pub use reader::{DecodedPack, Reader};
pub use record::{CompressionType, DiffFlags, DiffRecord};
pub use writer::Writer;

/// Errors from reading or writing a wdiff stream.
#[derive(Debug)]
pub enum WdiffError {
    Io(std::io::Error),
    BadFileHeader(file::FileHeaderError),
    BadPack(pack::PackError),
    BadRecordChecksum { io_address: u64, expected: u32, actual: u32 },
    Compression(snap::Error),
    Decompression(snap::Error),
}

impl std::fmt::Display for WdiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "wdiff io error: {e}"),
            Self::BadFileHeader(e) => write!(f, "wdiff file header error: {e}"),
            Self::BadPack(e) => write!(f, "wdiff pack error: {e}"),
            Self::BadRecordChecksum {
                io_address,
                expected,
                actual,
            } => write!(
                f,
                "record checksum mismatch at address {io_address}: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
            Self::Compression(e) => write!(f, "snappy compression failed: {e}"),
            Self::Decompression(e) => write!(f, "snappy decompression failed: {e}"),
        }
    }
}

impl std::error::Error for WdiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadFileHeader(e) => Some(e),
            Self::BadPack(e) => Some(e),
            Self::Compression(e) | Self::Decompression(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WdiffError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
