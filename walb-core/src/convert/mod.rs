//! Converts a wlog stream into a wdiff stream.
//!
//! Dispatch per log record: padding is skipped (it carries no target IO),
//! discard becomes an empty-payload `DISCARD` diff record, an all-zero
//! payload becomes an `ALLZERO` diff record, and everything else is copied
//! through uncompressed into the diff map. Records are staged through a
//! [`DiffMap`] before being flushed so that a log stream containing more
//! than one write to the same address converts to a single, last-write-wins
//! diff record rather than a redundant sequence of overlapping ones.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::block::allzero::is_all_zero;
use crate::diffmap::{DiffMap, DiffRecIo};
use crate::wdiff::{DiffFlags, Writer as WdiffWriter, WdiffError};
use crate::wlog::{LogRecord, Reader as WlogReader, WlogError};

/// Errors converting a wlog stream to wdiff.
#[derive(Debug)]
pub enum ConvertError {
    Wlog(WlogError),
    Wdiff(WdiffError),
    UuidMismatch { expected: [u8; 16], actual: [u8; 16] },
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wlog(e) => write!(f, "wlog read error during conversion: {e}"),
            Self::Wdiff(e) => write!(f, "wdiff write error during conversion: {e}"),
            Self::UuidMismatch { expected, actual } => {
                write!(f, "log device uuid {actual:02x?} does not match expected {expected:02x?}")
            }
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wlog(e) => Some(e),
            Self::Wdiff(e) => Some(e),
            Self::UuidMismatch { .. } => None,
        }
    }
}

/// Converts a single log record (with its already-checksum-verified
/// payload, empty for padding/discard) into the in-memory diff
/// representation, or `None` if it should be dropped (padding).
#[must_use]
pub fn log_to_diff(record: &LogRecord, payload: &[u8]) -> Option<DiffRecIo> {
    if record.flags.is_padding() {
        return None;
    }
    if record.flags.is_discard() {
        return Some(DiffRecIo {
            io_address: record.offset,
            io_blocks: record.io_size,
            flags: DiffFlags::EXIST | DiffFlags::DISCARD,
            checksum: 0,
            payload: Bytes::new(),
        });
    }
    if is_all_zero(payload) {
        return Some(DiffRecIo {
            io_address: record.offset,
            io_blocks: record.io_size,
            flags: DiffFlags::EXIST | DiffFlags::ALLZERO,
            checksum: 0,
            payload: Bytes::new(),
        });
    }
    Some(DiffRecIo {
        io_address: record.offset,
        io_blocks: record.io_size,
        flags: DiffFlags::EXIST,
        checksum: 0,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Drives a full wlog-to-wdiff conversion: reads every pack from `log`,
/// stages the resulting diff records in a [`DiffMap`], then flushes them
/// address-ordered through `out`.
pub struct Converter<R, W> {
    log: WlogReader<R>,
    out: WdiffWriter<W>,
    map: DiffMap,
}

impl<R: Read, W: Write> Converter<R, W> {
    pub fn new(log: WlogReader<R>, out: WdiffWriter<W>) -> Self {
        Self {
            log,
            out,
            map: DiffMap::new(),
        }
    }

    /// Read the entire log stream into the diff map. Call [`Self::finish`]
    /// afterward to flush it out.
    pub fn run(&mut self) -> Result<(), ConvertError> {
        while let Some(pack) = self.log.fetch_next().map_err(ConvertError::Wlog)? {
            for (record, payload) in pack.header.records.iter().zip(pack.payloads.iter()) {
                if let Some(rec_io) = log_to_diff(record, payload) {
                    self.map.add(rec_io);
                }
            }
        }
        Ok(())
    }

    /// Flush the staged diff map out through the wdiff writer and close it.
    pub fn finish(mut self) -> Result<(), ConvertError> {
        let lb = crate::block::LB_SIZE as usize;
        while let Some(rec) = self.map.extract_first() {
            if rec.flags.is_discard() {
                self.out.add_discard(rec.io_address, rec.io_blocks).map_err(ConvertError::Wdiff)?;
            } else if rec.flags.contains(DiffFlags::ALLZERO) {
                let zeros = vec![0u8; rec.io_blocks as usize * lb];
                self.out.add_io(rec.io_address, rec.io_blocks, &zeros).map_err(ConvertError::Wdiff)?;
            } else {
                self.out.add_io(rec.io_address, rec.io_blocks, &rec.payload).map_err(ConvertError::Wdiff)?;
            }
        }
        self.out.finish().map_err(ConvertError::Wdiff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wdiff::Reader as WdiffReader;
    use crate::wlog::{RecordFlags, Writer as WlogWriter};

    #[test]
    fn converts_normal_discard_and_allzero_records() {
        let pbs = 512;
        let mut log_buf = Vec::new();
        {
            let mut w = WlogWriter::new(&mut log_buf, pbs, 9, [1; 16], 0).unwrap();
            let mut payload = vec![0u8; pbs as usize];
            payload[0] = 0x7A;
            w.add_normal_at(0, &payload).unwrap();
            w.add_discard(16, 4).unwrap();
            w.add_normal_at(32, &vec![0u8; pbs as usize]).unwrap();
            w.finish().unwrap();
        }

        let log = WlogReader::new(std::io::Cursor::new(log_buf)).unwrap();
        let mut diff_buf = Vec::new();
        let wdiff_writer = WdiffWriter::new(&mut diff_buf, [1; 16], 2048).unwrap();
        let mut converter = Converter::new(log, wdiff_writer);
        converter.run().unwrap();
        converter.finish().unwrap();

        let mut reader = WdiffReader::new(std::io::Cursor::new(diff_buf)).unwrap();
        let pack = reader.fetch_next().unwrap().unwrap();
        assert_eq!(pack.records.len(), 3);
        assert!(pack.records[0].flags.contains(DiffFlags::EXIST));
        assert!(pack.records[1].flags.contains(DiffFlags::DISCARD));
        assert!(pack.records[2].flags.contains(DiffFlags::ALLZERO));
    }

    #[test]
    fn padding_records_are_dropped() {
        let rec = LogRecord {
            checksum: 0,
            lsid: 1,
            lsid_local: 0,
            flags: RecordFlags::EXIST | RecordFlags::PADDING,
            offset: 0,
            io_size: 4,
        };
        assert!(log_to_diff(&rec, &[]).is_none());
    }
}
