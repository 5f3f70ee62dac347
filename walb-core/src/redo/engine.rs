//! Drives a stream of diff records into writes against a target device:
//! clips out-of-range IOs, elides writes fully overwritten before they
//! reach the device, coalesces adjacent writes, and applies discards per
//! the configured [`DiscardMode`].

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::block::align::{AlignedBuf, BufPool};
use crate::block::LB_SIZE;
use crate::diffmap::DiffRecIo;
use crate::redo::ring::{Completion, SubmitRing};
use crate::redo::stats::RedoStats;
use crate::wdiff::DiffFlags;

/// How many not-yet-submitted writes may accumulate while still eligible
/// for overwrite elision before the oldest is forced out.
const MAX_PENDING_ENTRIES: usize = 256;

/// How the redo engine handles `DISCARD` diff records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardMode {
    /// Issue a real `BLKDISCARD` to the target range.
    Issue,
    /// Drop the record; the target's prior contents at that range are left
    /// untouched. The default: a target that is not a fresh/zeroed device
    /// may already hold whatever was discarded, and silently dropping is
    /// the only choice that works identically on a block device and a
    /// plain regular file (which has no discard primitive at all).
    #[default]
    Ignore,
    /// Write zeros over the discarded range.
    ZeroFill,
}

/// Redo engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RedoConfig {
    /// Maximum writes in flight at once.
    pub queue_depth: usize,
    /// Logical blocks a run of adjacent writes may be coalesced up to
    /// before being flushed as one IO.
    pub max_coalesce_blocks: u32,
    pub discard_mode: DiscardMode,
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            max_coalesce_blocks: 2048,
            discard_mode: DiscardMode::default(),
        }
    }
}

/// Errors applying redo IO against the target.
#[derive(Debug)]
pub enum RedoError {
    Io(std::io::Error),
    WriteFailed { offset: u64, errno: i32 },
    DiscardUnsupported,
}

impl std::fmt::Display for RedoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "redo io error: {e}"),
            Self::WriteFailed { offset, errno } => write!(f, "write at offset {offset} failed with errno {errno}"),
            Self::DiscardUnsupported => write!(f, "DiscardMode::Issue is not supported on this platform"),
        }
    }
}

impl std::error::Error for RedoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RedoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A write staged in submission order but not yet handed to the ring,
/// still eligible to be elided by a later fully-covering write.
struct Pending {
    io_address: u64,
    bytes: Vec<u8>,
}

impl Pending {
    fn end_address(&self) -> u64 {
        self.io_address + self.bytes.len() as u64 / LB_SIZE
    }

    fn blocks(&self) -> u32 {
        (self.bytes.len() as u64 / LB_SIZE) as u32
    }
}

/// Applies a sequence of diff records to a target file (or block device)
/// through [`SubmitRing`], within a device of `device_size_lb` logical
/// blocks.
pub struct RedoEngine {
    target: File,
    device_size_lb: u64,
    ring: SubmitRing,
    pool: BufPool,
    config: RedoConfig,
    stats: RedoStats,
    pending: VecDeque<Pending>,
    in_flight: HashMap<u64, AlignedBuf>,
    next_user_data: u64,
}

impl RedoEngine {
    pub fn new(target: File, pbs: u32, device_size_lb: u64, config: RedoConfig) -> Result<Self, RedoError> {
        let buf_size = config.max_coalesce_blocks as usize * LB_SIZE as usize;
        let pool = BufPool::new(config.queue_depth, buf_size, pbs as usize);
        let ring = SubmitRing::new(config.queue_depth as u32)?;
        Ok(Self {
            target,
            device_size_lb,
            ring,
            pool,
            config,
            stats: RedoStats::default(),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            next_user_data: 0,
        })
    }

    /// Record a padding log record; it carries no target IO, only an LSID.
    pub fn note_padding(&mut self, lsid: u64) {
        self.stats.observe_lsid(lsid);
        self.stats.n_padding += 1;
    }

    /// Apply one diff record at the given LSID.
    pub fn apply(&mut self, rec: &DiffRecIo, lsid: u64) -> Result<(), RedoError> {
        self.stats.observe_lsid(lsid);

        if rec.flags.contains(DiffFlags::DISCARD) {
            return self.apply_discard(rec);
        }

        let payload = if rec.flags.contains(DiffFlags::ALLZERO) {
            vec![0u8; rec.io_blocks as usize * LB_SIZE as usize]
        } else {
            rec.payload.to_vec()
        };
        self.apply_write(rec.io_address, payload)
    }

    /// Clip, coalesce, and stage a write, eliding any already-pending write
    /// it fully covers.
    fn apply_write(&mut self, io_address: u64, payload: Vec<u8>) -> Result<(), RedoError> {
        let blocks = (payload.len() as u64 / LB_SIZE) as u32;
        let end = io_address + u64::from(blocks);
        if end > self.device_size_lb {
            self.stats.n_clipped += 1;
            return Ok(());
        }

        if let Some(last) = self.pending.back_mut() {
            if last.end_address() == io_address && last.blocks() + blocks <= self.config.max_coalesce_blocks {
                last.bytes.extend_from_slice(&payload);
                self.stats.n_coalesced += 1;
                return Ok(());
            }
        }

        let mut overwritten = 0u64;
        self.pending.retain(|p| {
            let covered = p.io_address >= io_address && p.end_address() <= end;
            if covered {
                overwritten += 1;
            }
            !covered
        });
        self.stats.n_overwritten += overwritten;

        self.pending.push_back(Pending { io_address, bytes: payload });
        if self.pending.len() > MAX_PENDING_ENTRIES {
            self.flush_oldest_pending()?;
        }
        Ok(())
    }

    fn apply_discard(&mut self, rec: &DiffRecIo) -> Result<(), RedoError> {
        match self.config.discard_mode {
            DiscardMode::Ignore => Ok(()),
            DiscardMode::ZeroFill => {
                let zeros = vec![0u8; rec.io_blocks as usize * LB_SIZE as usize];
                self.apply_write(rec.io_address, zeros)
            }
            DiscardMode::Issue => {
                self.flush_all_pending()?;
                self.issue_discard(rec)
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn issue_discard(&mut self, rec: &DiffRecIo) -> Result<(), RedoError> {
        let range: [u64; 2] = [rec.io_address * LB_SIZE, u64::from(rec.io_blocks) * LB_SIZE];
        let fd = self.target.as_raw_fd();
        // SAFETY: `range` is a valid two-element array describing a
        // start/length pair, as `BLKDISCARD` expects.
        let rc = unsafe { libc::ioctl(fd, u64::from(BLKDISCARD), range.as_ptr()) };
        if rc < 0 {
            return Err(RedoError::Io(std::io::Error::last_os_error()));
        }
        self.stats.n_discard += 1;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn issue_discard(&mut self, _rec: &DiffRecIo) -> Result<(), RedoError> {
        Err(RedoError::DiscardUnsupported)
    }

    fn flush_oldest_pending(&mut self) -> Result<(), RedoError> {
        if let Some(p) = self.pending.pop_front() {
            self.submit_write(p.io_address, p.bytes)?;
        }
        Ok(())
    }

    fn flush_all_pending(&mut self) -> Result<(), RedoError> {
        while let Some(p) = self.pending.pop_front() {
            self.submit_write(p.io_address, p.bytes)?;
        }
        Ok(())
    }

    fn submit_write(&mut self, io_address: u64, payload: Vec<u8>) -> Result<(), RedoError> {
        while self.pool.available() == 0 {
            self.drain_completions(true)?;
        }
        let Some(mut buf) = self.pool.lease_zeroed() else {
            return Err(RedoError::Io(std::io::Error::other("buffer pool unexpectedly empty after drain")));
        };
        buf[..payload.len()].copy_from_slice(&payload);

        let user_data = self.next_user_data;
        self.next_user_data += 1;

        let fd = self.target.as_raw_fd();
        let offset = io_address * LB_SIZE;
        let len = payload.len();
        // SAFETY: `buf` is kept alive in `self.in_flight` until its
        // completion is reaped below.
        unsafe {
            self.ring.push_write(fd, &buf[..len], offset, user_data)?;
        }
        self.in_flight.insert(user_data, buf);
        self.stats.n_written += 1;

        if self.ring.in_flight() >= self.config.queue_depth {
            self.drain_completions(true)?;
        } else {
            self.drain_completions(false)?;
        }
        Ok(())
    }

    fn drain_completions(&mut self, wait: bool) -> Result<(), RedoError> {
        self.ring.submit_and_wait(if wait { 1 } else { 0 })?;
        let completions: Vec<Completion> = self.ring.reap();
        for c in completions {
            let buf = self.in_flight.remove(&c.user_data);
            if c.result < 0 {
                return Err(RedoError::WriteFailed {
                    offset: 0,
                    errno: -c.result,
                });
            }
            if let Some(buf) = buf {
                self.pool.release(buf);
            }
        }
        Ok(())
    }

    /// Flush every buffered write, wait for every in-flight IO to
    /// complete, and return the accumulated stats.
    pub fn finish(mut self) -> Result<RedoStats, RedoError> {
        self.flush_all_pending()?;
        while !self.in_flight.is_empty() {
            self.drain_completions(true)?;
        }
        Ok(self.stats)
    }

    #[must_use]
    pub const fn stats(&self) -> &RedoStats {
        &self.stats
    }
}

/// The target's size in logical blocks, read from file metadata on a
/// regular file or, on Linux, via `BLKGETSIZE64` when metadata reports
/// zero (as block devices do).
pub fn device_size_lb(file: &File) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len > 0 {
        return Ok(len / LB_SIZE);
    }
    linux_block_device_size(file)
}

#[cfg(target_os = "linux")]
fn linux_block_device_size(file: &File) -> std::io::Result<u64> {
    let mut bytes: u64 = 0;
    let fd = file.as_raw_fd();
    // SAFETY: `BLKGETSIZE64` writes a single `u64` through a valid pointer.
    let rc = unsafe { libc::ioctl(fd, u64::from(BLKGETSIZE64), std::ptr::addr_of_mut!(bytes)) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(bytes / LB_SIZE)
}

#[cfg(not(target_os = "linux"))]
fn linux_block_device_size(_file: &File) -> std::io::Result<u64> {
    Ok(0)
}

#[cfg(target_os = "linux")]
const BLKDISCARD: u32 = 0x1277;

#[cfg(target_os = "linux")]
const BLKGETSIZE64: u32 = 0x8008_1272;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write as _};

    fn make_rec(addr: u64, blocks: u32, byte: u8) -> DiffRecIo {
        DiffRecIo {
            io_address: addr,
            io_blocks: blocks,
            flags: DiffFlags::EXIST,
            checksum: 0,
            payload: bytes::Bytes::from(vec![byte; blocks as usize * LB_SIZE as usize]),
        }
    }

    fn target_of_size(blocks: u64) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.set_len(blocks * LB_SIZE).unwrap();
        f
    }

    #[test]
    fn coalesces_contiguous_adjacent_writes() {
        let target = target_of_size(16);
        let mut engine = RedoEngine::new(target.try_clone().unwrap(), 512, 16, RedoConfig::default()).unwrap();
        for addr in 0..4u64 {
            engine.apply(&make_rec(addr, 1, 0xAB), addr).unwrap();
        }
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_written, 1);
        assert_eq!(stats.n_coalesced, 3);
    }

    #[test]
    fn fully_overwritten_pending_write_is_elided() {
        let target = target_of_size(16);
        let engine_handle = target.try_clone().unwrap();
        let mut engine = RedoEngine::new(engine_handle, 512, 16, RedoConfig::default()).unwrap();
        engine.apply(&make_rec(0, 8, 0x50), 0).unwrap();
        engine.apply(&make_rec(0, 8, 0x60), 1).unwrap();
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_written, 1);
        assert_eq!(stats.n_overwritten, 1);

        let mut file = target;
        let mut readback = vec![0u8; 8 * LB_SIZE as usize];
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_exact(&mut readback).unwrap();
        assert!(readback.iter().all(|&b| b == 0x60));
    }

    #[test]
    fn out_of_range_write_is_clipped_not_partially_applied() {
        let target = target_of_size(100);
        let engine_handle = target.try_clone().unwrap();
        let mut engine = RedoEngine::new(engine_handle, 512, 100, RedoConfig::default()).unwrap();
        engine.apply(&make_rec(99, 2, 0x11), 0).unwrap();
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_clipped, 1);
        assert_eq!(stats.n_written, 0);

        let mut file = target;
        let mut last_block = vec![0u8; LB_SIZE as usize];
        file.seek(SeekFrom::Start(99 * LB_SIZE)).unwrap();
        file.read_exact(&mut last_block).unwrap();
        assert!(last_block.iter().all(|&b| b == 0));
    }

    #[test]
    fn discard_ignore_mode_leaves_target_untouched() {
        let target = target_of_size(8);
        let engine_handle = target.try_clone().unwrap();
        let config = RedoConfig {
            discard_mode: DiscardMode::Ignore,
            ..RedoConfig::default()
        };
        let mut engine = RedoEngine::new(engine_handle, 512, 8, config).unwrap();

        let discard = DiffRecIo {
            io_address: 0,
            io_blocks: 4,
            flags: DiffFlags::EXIST | DiffFlags::DISCARD,
            checksum: 0,
            payload: bytes::Bytes::new(),
        };
        engine.apply(&discard, 0).unwrap();
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_written, 0);
        assert_eq!(stats.n_discard, 0);
    }

    #[test]
    fn discard_zerofill_mode_writes_zeros() {
        let target = target_of_size(8);
        let mut file = target.try_clone().unwrap();
        file.write_all(&[0xFFu8; 4 * 512]).unwrap();
        file.flush().unwrap();

        let config = RedoConfig {
            discard_mode: DiscardMode::ZeroFill,
            ..RedoConfig::default()
        };
        let mut engine = RedoEngine::new(target.try_clone().unwrap(), 512, 8, config).unwrap();

        let discard = DiffRecIo {
            io_address: 0,
            io_blocks: 4,
            flags: DiffFlags::EXIST | DiffFlags::DISCARD,
            checksum: 0,
            payload: bytes::Bytes::new(),
        };
        engine.apply(&discard, 0).unwrap();
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_written, 1);

        let mut readback = vec![0u8; 4 * LB_SIZE as usize];
        let mut file = target;
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_exact(&mut readback).unwrap();
        assert!(readback.iter().all(|&b| b == 0));
    }

    #[test]
    fn padding_is_counted_without_touching_the_device() {
        let target = target_of_size(8);
        let mut engine = RedoEngine::new(target, 512, 8, RedoConfig::default()).unwrap();
        engine.note_padding(5);
        let stats = engine.finish().unwrap();
        assert_eq!(stats.n_padding, 1);
        assert_eq!(stats.begin_lsid, Some(5));
        assert_eq!(stats.end_lsid, Some(6));
    }
}
