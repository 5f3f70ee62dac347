//! Sequential wdiff writer: buffers records into a pack, compressing each
//! payload with `snap`'s raw (unframed) format before it is written.

use std::io::Write;

use crate::block::allzero::is_all_zero;
use crate::block::checksum;
use crate::wdiff::file::WdiffFileHeader;
use crate::wdiff::pack::Pack;
use crate::wdiff::record::{CompressionType, DiffFlags, DiffRecord};
use crate::wdiff::WdiffError;

/// Packs are flushed once they hold this many records, bounding how much
/// must be buffered in memory before a pack hits disk.
pub const MAX_RECORDS_PER_PACK: usize = 1024;

pub struct Writer<W> {
    inner: W,
    max_io_blocks: u16,
    records: Vec<DiffRecord>,
    payloads: Vec<Vec<u8>>,
}

impl<W: Write> Writer<W> {
    pub fn new(mut inner: W, uuid: [u8; 16], max_io_blocks: u16) -> Result<Self, WdiffError> {
        let header = WdiffFileHeader { max_io_blocks, uuid };
        inner.write_all(&header.to_bytes()).map_err(WdiffError::Io)?;
        Ok(Self {
            inner,
            max_io_blocks,
            records: Vec::new(),
            payloads: Vec::new(),
        })
    }

    /// Append a normal IO, splitting it at `max_io_blocks` boundaries and
    /// recognizing all-zero spans as `ALLZERO` records.
    pub fn add_io(&mut self, io_address: u64, io_blocks: u32, payload: &[u8]) -> Result<(), WdiffError> {
        let lb = crate::block::LB_SIZE as usize;
        let chunk_blocks = self.max_io_blocks as u32;
        let mut addr = io_address;
        let mut remaining = io_blocks;
        let mut off = 0usize;

        while remaining > 0 {
            let n = remaining.min(chunk_blocks.max(1));
            let slice = &payload[off..off + n as usize * lb];
            if is_all_zero(slice) {
                self.push_record(DiffRecord {
                    io_address: addr,
                    io_blocks: n,
                    flags: DiffFlags::EXIST | DiffFlags::ALLZERO,
                    compression: CompressionType::None,
                    data_offset: 0,
                    data_size: 0,
                    checksum: 0,
                });
            } else {
                self.push_compressed(addr, n, slice)?;
            }
            if self.records.len() >= MAX_RECORDS_PER_PACK {
                self.flush_pack()?;
            }
            addr += u64::from(n);
            remaining -= n;
            off += n as usize * lb;
        }
        Ok(())
    }

    pub fn add_discard(&mut self, io_address: u64, io_blocks: u32) -> Result<(), WdiffError> {
        self.push_record(DiffRecord {
            io_address,
            io_blocks,
            flags: DiffFlags::EXIST | DiffFlags::DISCARD,
            compression: CompressionType::None,
            data_offset: 0,
            data_size: 0,
            checksum: 0,
        });
        if self.records.len() >= MAX_RECORDS_PER_PACK {
            self.flush_pack()?;
        }
        Ok(())
    }

    fn push_compressed(&mut self, io_address: u64, io_blocks: u32, payload: &[u8]) -> Result<(), WdiffError> {
        let checksum = checksum::checksum(0, payload);
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder.compress_vec(payload).map_err(WdiffError::Compression)?;

        let (compression, data) = if compressed.len() < payload.len() {
            (CompressionType::Snappy, compressed)
        } else {
            (CompressionType::None, payload.to_vec())
        };

        self.push_record(DiffRecord {
            io_address,
            io_blocks,
            flags: DiffFlags::EXIST,
            compression,
            data_offset: 0,
            data_size: data.len() as u32,
            checksum,
        });
        self.payloads.push(data);
        Ok(())
    }

    fn push_record(&mut self, rec: DiffRecord) {
        if !rec.flags.carries_payload() {
            self.payloads.push(Vec::new());
        }
        self.records.push(rec);
    }

    pub fn flush_pack(&mut self) -> Result<(), WdiffError> {
        if self.records.is_empty() {
            return Ok(());
        }
        let pack = Pack {
            records: std::mem::take(&mut self.records),
            payloads: std::mem::take(&mut self.payloads),
        };
        self.inner.write_all(&pack.to_bytes()).map_err(WdiffError::Io)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), WdiffError> {
        self.flush_pack()?;
        self.inner.flush().map_err(WdiffError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wdiff::reader::Reader;

    #[test]
    fn writes_and_reads_back_allzero_and_normal_records() {
        let lb = crate::block::LB_SIZE as usize;
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf, [5u8; 16], 2048).unwrap();
        writer.add_io(0, 2, &vec![0u8; 2 * lb]).unwrap();
        writer.add_io(2, 2, &vec![0x42u8; 2 * lb]).unwrap();
        writer.add_discard(4, 1).unwrap();
        writer.finish().unwrap();

        let mut reader = Reader::new(std::io::Cursor::new(buf)).unwrap();
        let pack = reader.fetch_next().unwrap().unwrap();
        assert_eq!(pack.records.len(), 3);
        assert!(pack.records[0].flags.contains(DiffFlags::ALLZERO));
        assert!(pack.records[2].flags.contains(DiffFlags::DISCARD));
        assert_eq!(pack.payloads[1], vec![0x42u8; 2 * lb]);

        assert!(reader.fetch_next().unwrap().is_none());
    }
}
