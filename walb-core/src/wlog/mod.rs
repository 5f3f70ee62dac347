//! The wlog (write-ahead log stream) format: on-disk record layout, and
//! streaming reader/writer over it, organized as packs of fixed-size
//! records followed by their payload blocks.

pub mod header;
pub mod reader;
pub mod record;
pub mod writer;

pub use header::{HeaderError, LogPackHeader, WlogFileHeader};
pub use reader::{LogPack, Reader};
pub use record::{LogRecord, RecordFlags, RECORD_SIZE};
pub use writer::Writer;

/// Errors from reading or writing a wlog stream.
#[derive(Debug)]
pub enum WlogError {
    Io(std::io::Error),
    BadHeader(HeaderError),
    BadRecordChecksum { lsid: u64, expected: u32, actual: u32 },
    Misaligned(usize),
    TooMuchPadding,
}

impl std::fmt::Display for WlogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "wlog io error: {e}"),
            Self::BadHeader(e) => write!(f, "wlog header error: {e}"),
            Self::BadRecordChecksum { lsid, expected, actual } => write!(
                f,
                "record checksum mismatch at lsid {lsid}: expected 0x{expected:08x}, got 0x{actual:08x}"
            ),
            Self::Misaligned(len) => write!(f, "payload length {len} is not a multiple of the logical block size"),
            Self::TooMuchPadding => write!(f, "a log pack may contain at most one padding record"),
        }
    }
}

impl std::error::Error for WlogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadHeader(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WlogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
