//! Sequential writer building up a wlog stream pack by pack.

use std::io::Write;

use crate::block::{self, checksum, LB_SIZE};
use crate::wlog::header::{max_records_in_one_pb, LogPackHeader, WlogFileHeader};
use crate::wlog::record::{LogRecord, RecordFlags};
use crate::wlog::WlogError;

/// Builds and flushes log packs to an underlying writer, filling each pack
/// up to its physical-block capacity before starting the next one.
pub struct Writer<W> {
    inner: W,
    pbs: u32,
    salt: u32,
    max_records: u16,
    next_pack_lsid: u64,
    records: Vec<LogRecord>,
    payloads: Vec<Vec<u8>>,
    n_padding: u16,
}

impl<W: Write> Writer<W> {
    /// Write the file header and return a `Writer` ready to accept records.
    /// `begin_lsid` is the LSID of the first pack that will be emitted.
    pub fn new(mut inner: W, pbs: u32, salt: u32, uuid: [u8; 16], begin_lsid: u64) -> Result<Self, WlogError> {
        let placeholder = WlogFileHeader {
            salt,
            pbs,
            uuid,
            begin_lsid,
            end_lsid: begin_lsid,
        };
        inner.write_all(&placeholder.to_page(pbs)).map_err(WlogError::Io)?;
        Ok(Self {
            inner,
            pbs,
            salt,
            max_records: max_records_in_one_pb(pbs),
            next_pack_lsid: begin_lsid,
            records: Vec::new(),
            payloads: Vec::new(),
            n_padding: 0,
        })
    }

    /// Append a normal IO record. `payload` must be a multiple of
    /// [`LB_SIZE`] bytes. `offset` is the target LBA.
    pub fn add_normal(&mut self, payload: &[u8]) -> Result<(), WlogError> {
        self.add_normal_at(0, payload)
    }

    /// Append a normal IO record targeting a specific LBA offset.
    pub fn add_normal_at(&mut self, offset: u64, payload: &[u8]) -> Result<(), WlogError> {
        if payload.len() % LB_SIZE as usize != 0 {
            return Err(WlogError::Misaligned(payload.len()));
        }
        self.ensure_room()?;

        let io_size = (payload.len() / LB_SIZE as usize) as u32;
        let n_pb = block::capacity_pb(self.pbs, io_size);
        let mut padded = vec![0u8; n_pb as usize * self.pbs as usize];
        padded[..payload.len()].copy_from_slice(payload);
        let rec_checksum = checksum::checksum(self.salt, &padded);

        let lsid_local = self.records.len() as u32;
        self.records.push(LogRecord {
            checksum: rec_checksum,
            lsid: self.next_pack_lsid + 1 + u64::from(lsid_local),
            lsid_local,
            flags: RecordFlags::EXIST,
            offset,
            io_size,
        });
        self.payloads.push(padded);
        Ok(())
    }

    /// Append a discard record; carries no payload bytes.
    pub fn add_discard(&mut self, offset: u64, io_size: u32) -> Result<(), WlogError> {
        self.ensure_room()?;
        let lsid_local = self.records.len() as u32;
        self.records.push(LogRecord {
            checksum: 0,
            lsid: self.next_pack_lsid + 1 + u64::from(lsid_local),
            lsid_local,
            flags: RecordFlags::EXIST | RecordFlags::DISCARD,
            offset,
            io_size,
        });
        self.payloads.push(Vec::new());
        Ok(())
    }

    /// Append a padding record of `io_size` logical blocks, used to round
    /// out a pack that would otherwise straddle the end of the ring buffer.
    /// At most one padding record is allowed per pack.
    pub fn add_padding(&mut self, io_size: u32) -> Result<(), WlogError> {
        if self.n_padding >= 1 {
            return Err(WlogError::TooMuchPadding);
        }
        self.ensure_room()?;
        let n_pb = block::capacity_pb(self.pbs, io_size);
        let lsid_local = self.records.len() as u32;
        self.records.push(LogRecord {
            checksum: 0,
            lsid: self.next_pack_lsid + 1 + u64::from(lsid_local),
            lsid_local,
            flags: RecordFlags::EXIST | RecordFlags::PADDING,
            offset: 0,
            io_size,
        });
        self.payloads.push(vec![0u8; n_pb as usize * self.pbs as usize]);
        self.n_padding += 1;
        Ok(())
    }

    fn ensure_room(&mut self) -> Result<(), WlogError> {
        if self.records.len() >= self.max_records as usize {
            self.flush_pack()?;
        }
        Ok(())
    }

    /// Flush the pack currently being built, if it has any records.
    pub fn flush_pack(&mut self) -> Result<(), WlogError> {
        if self.records.is_empty() {
            return Ok(());
        }

        let total_io_size = self.records.iter().map(|r| r.io_size).sum();
        let pack = LogPackHeader {
            checksum: 0,
            total_io_size,
            logpack_lsid: self.next_pack_lsid,
            n_padding: self.n_padding,
            records: std::mem::take(&mut self.records),
        };
        let page = pack.to_page(self.pbs, self.salt).map_err(WlogError::BadHeader)?;
        self.inner.write_all(&page).map_err(WlogError::Io)?;

        let mut blocks_written = 1u64;
        for (rec, payload) in pack.records.iter().zip(std::mem::take(&mut self.payloads)) {
            if !rec.flags.is_discard() {
                self.inner.write_all(&payload).map_err(WlogError::Io)?;
                blocks_written += (payload.len() / self.pbs as usize) as u64;
            }
        }

        self.next_pack_lsid += blocks_written;
        self.n_padding = 0;
        Ok(())
    }

    /// Flush any pending pack and write the end-of-stream marker. The
    /// caller must rewrite the file header's `end_lsid` separately if it
    /// needs to be accurate before the stream is closed (the marker itself
    /// is sufficient for [`crate::wlog::reader::Reader`] to stop cleanly).
    pub fn finish(mut self) -> Result<(), WlogError> {
        self.flush_pack()?;
        let marker = LogPackHeader::end_of_stream();
        let page = marker.to_page(self.pbs, self.salt).map_err(WlogError::BadHeader)?;
        self.inner.write_all(&page).map_err(WlogError::Io)?;
        self.inner.flush().map_err(WlogError::Io)?;
        Ok(())
    }

    #[must_use]
    pub const fn next_pack_lsid(&self) -> u64 {
        self.next_pack_lsid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wlog::reader::Reader;

    #[test]
    fn pack_fills_before_flushing() {
        let pbs = 512;
        let max = max_records_in_one_pb(pbs) as usize;
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf, pbs, 1, [0; 16], 0).unwrap();
        for i in 0..max + 1 {
            writer.add_normal_at(i as u64, &[0u8; 512]).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = Reader::new(std::io::Cursor::new(buf)).unwrap();
        let first = reader.fetch_next().unwrap().unwrap();
        assert_eq!(first.header.records.len(), max);
        let second = reader.fetch_next().unwrap().unwrap();
        assert_eq!(second.header.records.len(), 1);
        assert!(reader.fetch_next().unwrap().is_none());
    }

    #[test]
    fn discard_record_carries_no_payload_bytes() {
        let pbs = 512;
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf, pbs, 7, [1; 16], 0).unwrap();
        writer.add_discard(0, 4).unwrap();
        writer.finish().unwrap();

        let mut reader = Reader::new(std::io::Cursor::new(buf)).unwrap();
        let pack = reader.fetch_next().unwrap().unwrap();
        assert!(pack.header.records[0].flags.is_discard());
        assert!(pack.payloads[0].is_empty());
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf, 512, 0, [0; 16], 0).unwrap();
        let err = writer.add_normal(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, WlogError::Misaligned(10)));
    }
}
