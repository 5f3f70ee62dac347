//! Sequential wdiff reader: decodes pack by pack and transparently
//! decompresses snappy payloads back to raw bytes.

use std::io::Read;

use crate::block::checksum;
use crate::wdiff::file::{WdiffFileHeader, FILE_HEADER_SIZE};
use crate::wdiff::pack::{Pack, PACK_HEADER_FIXED_SIZE};
use crate::wdiff::record::{CompressionType, DiffRecord};
use crate::wdiff::WdiffError;

/// One decoded pack with payloads already decompressed to their original
/// bytes.
#[derive(Debug)]
pub struct DecodedPack {
    pub records: Vec<DiffRecord>,
    pub payloads: Vec<Vec<u8>>,
}

pub struct Reader<R> {
    inner: R,
    max_io_blocks: u16,
    uuid: [u8; 16],
}

impl<R: Read> Reader<R> {
    pub fn new(mut inner: R) -> Result<Self, WdiffError> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        inner.read_exact(&mut buf).map_err(WdiffError::Io)?;
        let header = WdiffFileHeader::from_bytes(&buf).map_err(WdiffError::BadFileHeader)?;
        Ok(Self {
            inner,
            max_io_blocks: header.max_io_blocks,
            uuid: header.uuid,
        })
    }

    #[must_use]
    pub const fn max_io_blocks(&self) -> u16 {
        self.max_io_blocks
    }

    #[must_use]
    pub const fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    /// Read and decode the next pack, or `None` at end of stream.
    pub fn fetch_next(&mut self) -> Result<Option<DecodedPack>, WdiffError> {
        let mut header_buf = [0u8; PACK_HEADER_FIXED_SIZE];
        if !read_exact_or_eof(&mut self.inner, &mut header_buf)? {
            return Ok(None);
        }

        let info = Pack::parse_header(&header_buf);
        let mut body = vec![0u8; info.body_len()];
        self.inner.read_exact(&mut body).map_err(WdiffError::Io)?;

        let pack = Pack::from_body(&info, &body).map_err(WdiffError::BadPack)?;

        let mut payloads = Vec::with_capacity(pack.payloads.len());
        for (rec, raw) in pack.records.iter().zip(pack.payloads.into_iter()) {
            if !rec.flags.carries_payload() {
                payloads.push(Vec::new());
                continue;
            }
            let decompressed = match rec.compression {
                CompressionType::None => raw,
                CompressionType::Snappy => {
                    let mut decoder = snap::raw::Decoder::new();
                    decoder.decompress_vec(&raw).map_err(WdiffError::Decompression)?
                }
            };
            let computed = checksum::checksum(0, &decompressed);
            if computed != rec.checksum {
                return Err(WdiffError::BadRecordChecksum {
                    io_address: rec.io_address,
                    expected: rec.checksum,
                    actual: computed,
                });
            }
            payloads.push(decompressed);
        }

        Ok(Some(DecodedPack {
            records: pack.records,
            payloads,
        }))
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, WdiffError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).map_err(WdiffError::Io)?;
        if n == 0 {
            return if filled == 0 {
                Ok(false)
            } else {
                Err(WdiffError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated wdiff stream mid-pack",
                )))
            };
        }
        filled += n;
    }
    Ok(true)
}
