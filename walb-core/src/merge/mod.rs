//! Streaming N-way wdiff merge, oldest-to-newest, bounded by a search
//! window rather than loading every input file into memory.
//!
//! Each input stream is individually address-ordered and non-overlapping
//! (a wdiff file invariant); merging N of them in chronological order with
//! later streams winning on overlap is exactly [`crate::diffmap::DiffMap::add`]'s
//! semantics. The only reason this module exists instead of just folding
//! every stream through one `DiffMap` is memory: a record can only be
//! finalized once every newer stream has advanced far enough that it could
//! no longer produce an overlapping write, and `search_len` is the bound on
//! how far "far enough" is.

use std::collections::VecDeque;
use std::io::Read;

use crate::diffmap::DiffMap;
use crate::diffmap::DiffRecIo;
use crate::wdiff::{DecodedPack, Reader as WdiffReader, WdiffError};

/// Merge tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    /// How many logical blocks ahead of the current horizon to keep
    /// pulling records before assuming no further overlap is possible.
    /// Must be at least twice the largest `max_io_blocks` among the input
    /// streams, or an overlapping newer write could arrive after its
    /// target address has already been finalized and emitted.
    pub search_len: u64,
    /// Reject streams whose device UUID does not match the first stream's.
    /// Left `false` by default: a merge is routinely run across diffs
    /// captured around a device UUID rotation, so silently trusting the
    /// caller's file selection is the more useful default.
    pub check_uuid: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            search_len: 2048,
            check_uuid: false,
        }
    }
}

/// Errors from merging wdiff streams.
#[derive(Debug)]
pub enum MergeError {
    Wdiff(WdiffError),
    UuidMismatch { stream_index: usize, expected: [u8; 16], actual: [u8; 16] },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wdiff(e) => write!(f, "wdiff error during merge: {e}"),
            Self::UuidMismatch {
                stream_index,
                expected,
                actual,
            } => write!(
                f,
                "stream {stream_index} has device uuid {actual:02x?}, expected {expected:02x?}"
            ),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wdiff(e) => Some(e),
            Self::UuidMismatch { .. } => None,
        }
    }
}

/// Wraps one input stream with a small lookahead queue so the merger can
/// peek its next address without consuming it.
struct StreamState<R> {
    reader: WdiffReader<R>,
    queue: VecDeque<DiffRecIo>,
    exhausted: bool,
}

impl<R: Read> StreamState<R> {
    fn new(reader: WdiffReader<R>) -> Self {
        Self {
            reader,
            queue: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<(), MergeError> {
        if !self.queue.is_empty() || self.exhausted {
            return Ok(());
        }
        match self.reader.fetch_next().map_err(MergeError::Wdiff)? {
            None => self.exhausted = true,
            Some(pack) => self.queue.extend(decoded_pack_into_recios(pack)),
        }
        Ok(())
    }

    fn peek_address(&mut self) -> Result<Option<u64>, MergeError> {
        self.fill()?;
        Ok(self.queue.front().map(|r| r.io_address))
    }

    fn pop(&mut self) -> Result<Option<DiffRecIo>, MergeError> {
        self.fill()?;
        Ok(self.queue.pop_front())
    }
}

fn decoded_pack_into_recios(pack: DecodedPack) -> Vec<DiffRecIo> {
    pack.records
        .into_iter()
        .zip(pack.payloads)
        .map(|(rec, payload)| DiffRecIo {
            io_address: rec.io_address,
            io_blocks: rec.io_blocks,
            flags: rec.flags,
            checksum: rec.checksum,
            payload: bytes::Bytes::from(payload),
        })
        .collect()
}

/// Merges `streams`, ordered oldest-first, into a single address-ordered,
/// non-overlapping sequence of [`DiffRecIo`]s with newcomer-wins overlap
/// resolution.
pub struct Merger<R> {
    streams: Vec<StreamState<R>>,
    window: DiffMap,
    config: MergeConfig,
    done: bool,
}

impl<R: Read> Merger<R> {
    /// `streams` must be ordered oldest to newest: on overlap, a later
    /// stream's record always wins.
    pub fn new(streams: Vec<WdiffReader<R>>, config: MergeConfig) -> Result<Self, MergeError> {
        if config.check_uuid {
            if let Some(first) = streams.first() {
                let expected = first.uuid();
                for (i, s) in streams.iter().enumerate().skip(1) {
                    if s.uuid() != expected {
                        return Err(MergeError::UuidMismatch {
                            stream_index: i,
                            expected,
                            actual: s.uuid(),
                        });
                    }
                }
            }
        }
        Ok(Self {
            streams: streams.into_iter().map(StreamState::new).collect(),
            window: DiffMap::new(),
            config,
            done: false,
        })
    }

    /// Pull the next merged record, in ascending address order, or `None`
    /// once every input stream is exhausted and the window is drained.
    pub fn next_record(&mut self) -> Result<Option<DiffRecIo>, MergeError> {
        loop {
            if let Some(rec) = self.try_emit_ready()? {
                return Ok(Some(rec));
            }
            if self.done {
                return Ok(None);
            }
            self.pull_round()?;
        }
    }

    /// Pull every record within the search window from each stream,
    /// oldest-first, so overlap resolution sees them in precedence order.
    fn pull_round(&mut self) -> Result<(), MergeError> {
        // Every stream exhausted: drain whatever the window still holds.
        let Some(horizon) = self.horizon()? else {
            self.done = true;
            return Ok(());
        };
        let bound = horizon.saturating_add(self.config.search_len);

        for stream in &mut self.streams {
            loop {
                match stream.peek_address()? {
                    Some(addr) if addr <= bound => {
                        let Some(rec) = stream.pop()? else { break };
                        self.window.add(rec);
                    }
                    _ => break,
                }
            }
        }
        Ok(())
    }

    /// The lowest address any non-exhausted stream could still produce.
    fn horizon(&mut self) -> Result<Option<u64>, MergeError> {
        let mut min = None;
        for stream in &mut self.streams {
            if let Some(addr) = stream.peek_address()? {
                min = Some(min.map_or(addr, |m: u64| m.min(addr)));
            }
        }
        Ok(min)
    }

    /// Emit the lowest-addressed window entry if it is guaranteed final:
    /// either every stream is exhausted, or its end lies at or before the
    /// address every remaining stream has already advanced past.
    fn try_emit_ready(&mut self) -> Result<Option<DiffRecIo>, MergeError> {
        if self.window.is_empty() {
            return Ok(None);
        }
        if self.done {
            return Ok(self.window.extract_first());
        }

        let horizon = self.horizon()?;
        let Some(horizon) = horizon else {
            self.done = true;
            return Ok(self.window.extract_first());
        };
        let bound = horizon.saturating_add(self.config.search_len);

        let first_end = self.window.iter().next().map(DiffRecIo::end_address);
        match first_end {
            Some(end) if end <= bound => Ok(self.window.extract_first()),
            _ => Ok(None),
        }
    }
}
