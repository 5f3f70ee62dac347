//! Sequential reader over a wlog stream.

use std::io::Read;

use crate::block::checksum;
use crate::wlog::header::{LogPackHeader, WlogFileHeader, FILE_HEADER_SIZE};
use crate::wlog::record::LogRecord;
use crate::wlog::WlogError;

/// One decoded log-pack: its header plus the payload blocks belonging to
/// each non-padding, non-discard record, in record order.
#[derive(Debug)]
pub struct LogPack {
    pub header: LogPackHeader,
    /// Payload bytes for each record in `header.records`, same index order.
    /// Padding and discard records carry an empty `Vec`.
    pub payloads: Vec<Vec<u8>>,
}

/// Reads a wlog stream pack by pack, verifying every checksum along the way.
pub struct Reader<R> {
    inner: R,
    pbs: u32,
    salt: u32,
    uuid: [u8; 16],
    begin_lsid: u64,
    end_lsid: u64,
    finished: bool,
}

impl<R: Read> Reader<R> {
    /// Read and validate the file header, then construct a `Reader`
    /// positioned at the first log pack.
    pub fn new(mut inner: R) -> Result<Self, WlogError> {
        let mut page = vec![0u8; FILE_HEADER_SIZE];
        inner.read_exact(&mut page).map_err(WlogError::Io)?;
        let header = WlogFileHeader::from_page(&page).map_err(WlogError::BadHeader)?;
        Ok(Self {
            inner,
            pbs: header.pbs,
            salt: header.salt,
            uuid: header.uuid,
            begin_lsid: header.begin_lsid,
            end_lsid: header.end_lsid,
            finished: false,
        })
    }

    #[must_use]
    pub const fn pbs(&self) -> u32 {
        self.pbs
    }

    #[must_use]
    pub const fn salt(&self) -> u32 {
        self.salt
    }

    #[must_use]
    pub const fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    #[must_use]
    pub const fn begin_lsid(&self) -> u64 {
        self.begin_lsid
    }

    #[must_use]
    pub const fn end_lsid(&self) -> u64 {
        self.end_lsid
    }

    /// Read the next pack, or `None` once the end-of-stream marker (or EOF)
    /// is reached.
    pub fn fetch_next(&mut self) -> Result<Option<LogPack>, WlogError> {
        if self.finished {
            return Ok(None);
        }

        let mut page = vec![0u8; self.pbs as usize];
        if !read_exact_or_eof(&mut self.inner, &mut page)? {
            self.finished = true;
            return Ok(None);
        }

        let header = LogPackHeader::from_page(&page, self.pbs, self.salt).map_err(WlogError::BadHeader)?;
        if header.is_end_of_stream() {
            self.finished = true;
            return Ok(None);
        }

        let mut payloads = Vec::with_capacity(header.records.len());
        for rec in &header.records {
            if rec.flags.is_discard() || rec.flags.is_padding() {
                payloads.push(Vec::new());
                // Padding still occupies physical blocks in the stream.
                if rec.flags.is_padding() {
                    skip_blocks(&mut self.inner, rec.io_size, self.pbs)?;
                }
                continue;
            }
            let payload = read_record_payload(&mut self.inner, rec, self.pbs)?;
            verify_record_checksum(rec, &payload, self.salt)?;
            payloads.push(payload);
        }

        Ok(Some(LogPack { header, payloads }))
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WlogError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).map_err(WlogError::Io)?;
        if n == 0 {
            return if filled == 0 {
                Ok(false)
            } else {
                Err(WlogError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated wlog stream mid-block",
                )))
            };
        }
        filled += n;
    }
    Ok(true)
}

fn read_record_payload<R: Read>(reader: &mut R, rec: &LogRecord, pbs: u32) -> Result<Vec<u8>, WlogError> {
    let n_blocks = capacity_pb_for(rec.io_size, pbs);
    let mut buf = vec![0u8; n_blocks as usize * pbs as usize];
    reader.read_exact(&mut buf).map_err(WlogError::Io)?;
    Ok(buf)
}

fn skip_blocks<R: Read>(reader: &mut R, lb_count: u32, pbs: u32) -> Result<(), WlogError> {
    let n_blocks = capacity_pb_for(lb_count, pbs);
    let mut discard = vec![0u8; n_blocks as usize * pbs as usize];
    reader.read_exact(&mut discard).map_err(WlogError::Io)?;
    Ok(())
}

fn capacity_pb_for(lb_count: u32, pbs: u32) -> u32 {
    crate::block::capacity_pb(pbs, lb_count)
}

fn verify_record_checksum(rec: &LogRecord, payload: &[u8], salt: u32) -> Result<(), WlogError> {
    let computed = checksum::checksum(salt, payload);
    if computed != rec.checksum {
        return Err(WlogError::BadRecordChecksum {
            lsid: rec.lsid,
            expected: rec.checksum,
            actual: computed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wlog::writer::Writer;

    #[test]
    fn reads_back_a_single_record_pack() {
        let pbs = 512;
        let uuid = [9u8; 16];
        let salt = 42;
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf, pbs, salt, uuid, 100).unwrap();
            let mut payload = vec![0u8; pbs as usize];
            payload[..11].copy_from_slice(b"hello-world");
            writer.add_normal(&payload).unwrap();
            writer.finish().unwrap();
        }

        let mut reader = Reader::new(std::io::Cursor::new(buf)).unwrap();
        assert_eq!(reader.pbs(), pbs);
        assert_eq!(reader.salt(), salt);

        let pack = reader.fetch_next().unwrap().unwrap();
        assert_eq!(pack.header.records.len(), 1);
        assert!(pack.header.records[0].flags.is_normal());

        let end = reader.fetch_next().unwrap();
        assert!(end.is_none());
    }
}
