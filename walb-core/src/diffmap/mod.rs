//! The in-memory diff map: a non-overlapping, address-ordered collection
//! of pending diff records, backed by a `BTreeMap` keyed on `io_address`.
//!
//! Overlap is resolved by ownership transfer — an overlapping existing
//! entry is removed from the map and, if any of it survives outside the
//! new entry's range, a truncated copy is reinserted — never mutated in
//! place. [`DiffRecIo::payload`] is a [`bytes::Bytes`], so truncation is a
//! ref-counted subslice, not a copy.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::block::LB_SIZE;
use crate::wdiff::DiffFlags;

/// An in-memory diff record: address range, flags, and (if any) the raw
/// uncompressed payload.
#[derive(Debug, Clone)]
pub struct DiffRecIo {
    pub io_address: u64,
    pub io_blocks: u32,
    pub flags: DiffFlags,
    pub checksum: u32,
    /// Empty for `ALLZERO`/`DISCARD` records.
    pub payload: Bytes,
}

impl DiffRecIo {
    #[must_use]
    pub const fn end_address(&self) -> u64 {
        self.io_address + self.io_blocks as u64
    }

    /// Keep the leading `len_blocks` blocks of this record.
    fn keep_leading(&self, len_blocks: u32) -> Self {
        let payload = if self.flags.carries_payload() {
            self.payload.slice(0..len_blocks as usize * LB_SIZE as usize)
        } else {
            Bytes::new()
        };
        Self {
            io_address: self.io_address,
            io_blocks: len_blocks,
            flags: self.flags,
            checksum: self.checksum,
            payload,
        }
    }

    /// Keep the blocks of this record starting at absolute address `from`.
    fn keep_from(&self, from: u64) -> Self {
        let dropped_blocks = (from - self.io_address) as u32;
        let remaining_blocks = self.io_blocks - dropped_blocks;
        let payload = if self.flags.carries_payload() {
            self.payload.slice(dropped_blocks as usize * LB_SIZE as usize..)
        } else {
            Bytes::new()
        };
        Self {
            io_address: from,
            io_blocks: remaining_blocks,
            flags: self.flags,
            checksum: self.checksum,
            payload,
        }
    }
}

/// Summary statistics over a diff map's current contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffMapStats {
    pub n_records: usize,
    pub total_blocks: u64,
    pub payload_bytes: u64,
}

/// Non-overlapping, address-ordered map of pending diff records.
#[derive(Debug, Default)]
pub struct DiffMap {
    map: BTreeMap<u64, DiffRecIo>,
}

impl DiffMap {
    #[must_use]
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert `new`, splitting it at `max_io_blocks` boundaries first so no
    /// stored entry exceeds the wdiff file's maximum single-IO size.
    pub fn add_split(&mut self, new: DiffRecIo, max_io_blocks: u32) {
        if max_io_blocks == 0 || new.io_blocks <= max_io_blocks {
            self.add(new);
            return;
        }
        let mut offset = 0u32;
        while offset < new.io_blocks {
            let chunk_blocks = (new.io_blocks - offset).min(max_io_blocks);
            let chunk = new.keep_from(new.io_address + u64::from(offset)).keep_leading(chunk_blocks);
            self.add(chunk);
            offset += chunk_blocks;
        }
    }

    /// Insert `new`, overwriting (and truncating, as needed) any existing
    /// entries it overlaps. The newcomer always wins.
    pub fn add(&mut self, new: DiffRecIo) {
        let new_start = new.io_address;
        let new_end = new.end_address();
        if new_start == new_end {
            return;
        }

        // The one entry that could start before `new_start` and still
        // overlap it.
        if let Some((&key, _)) = self.map.range(..new_start).next_back() {
            if let Some(existing) = self.map.remove(&key) {
                if existing.end_address() <= new_start {
                    // No actual overlap; put it back untouched.
                    self.map.insert(key, existing);
                } else {
                    if existing.io_address < new_start {
                        let left = existing.keep_leading((new_start - existing.io_address) as u32);
                        self.map.insert(left.io_address, left);
                    }
                    if existing.end_address() > new_end {
                        let right = existing.keep_from(new_end);
                        self.map.insert(right.io_address, right);
                    }
                }
            }
        }

        // Entries wholly or partly inside [new_start, new_end) get dropped
        // or trimmed down to whatever tail survives past `new_end`.
        let keys: Vec<u64> = self.map.range(new_start..new_end).map(|(&k, _)| k).collect();
        for key in keys {
            let Some(existing) = self.map.remove(&key) else { continue };
            if existing.end_address() > new_end {
                let right = existing.keep_from(new_end);
                self.map.insert(right.io_address, right);
            }
        }

        self.map.insert(new_start, new);
    }

    /// Remove and return the lowest-addressed entry, if any.
    pub fn extract_first(&mut self) -> Option<DiffRecIo> {
        let key = *self.map.keys().next()?;
        self.map.remove(&key)
    }

    /// Iterate entries in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &DiffRecIo> {
        self.map.values()
    }

    #[must_use]
    pub fn stats(&self) -> DiffMapStats {
        let mut stats = DiffMapStats::default();
        for rec in self.map.values() {
            stats.n_records += 1;
            stats.total_blocks += u64::from(rec.io_blocks);
            stats.payload_bytes += rec.payload.len() as u64;
        }
        stats
    }

    /// Verify the non-overlap invariant holds (used by property tests; the
    /// map's own insert logic should make violations impossible).
    #[must_use]
    pub fn is_non_overlapping(&self) -> bool {
        let mut prev_end: Option<u64> = None;
        for rec in self.map.values() {
            if let Some(end) = prev_end {
                if rec.io_address < end {
                    return false;
                }
            }
            prev_end = Some(rec.end_address());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_rec(addr: u64, blocks: u32, byte: u8) -> DiffRecIo {
        DiffRecIo {
            io_address: addr,
            io_blocks: blocks,
            flags: DiffFlags::EXIST,
            checksum: 0,
            payload: Bytes::from(vec![byte; blocks as usize * LB_SIZE as usize]),
        }
    }

    #[test]
    fn non_overlapping_inserts_stay_separate() {
        let mut map = DiffMap::new();
        map.add(make_rec(0, 4, 1));
        map.add(make_rec(10, 4, 2));
        assert_eq!(map.len(), 2);
        assert!(map.is_non_overlapping());
    }

    #[test]
    fn fully_covered_existing_is_dropped() {
        let mut map = DiffMap::new();
        map.add(make_rec(0, 4, 1));
        map.add(make_rec(0, 8, 2));
        assert_eq!(map.len(), 1);
        let only = map.iter().next().unwrap();
        assert_eq!(only.io_address, 0);
        assert_eq!(only.io_blocks, 8);
    }

    #[test]
    fn left_overlap_truncates_existing_to_its_head() {
        let mut map = DiffMap::new();
        map.add(make_rec(0, 8, 1)); // [0, 8)
        map.add(make_rec(4, 8, 2)); // [4, 12) overwrites tail of the first
        assert!(map.is_non_overlapping());
        let recs: Vec<_> = map.iter().collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].io_address, 0);
        assert_eq!(recs[0].io_blocks, 4); // [0,4) survives
        assert_eq!(recs[1].io_address, 4);
        assert_eq!(recs[1].io_blocks, 8);
    }

    #[test]
    fn right_overlap_truncates_existing_to_its_tail() {
        let mut map = DiffMap::new();
        map.add(make_rec(4, 8, 1)); // [4, 12)
        map.add(make_rec(0, 8, 2)); // [0, 8) overwrites head of the first
        assert!(map.is_non_overlapping());
        let recs: Vec<_> = map.iter().collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].io_address, 0);
        assert_eq!(recs[0].io_blocks, 8);
        assert_eq!(recs[1].io_address, 8);
        assert_eq!(recs[1].io_blocks, 4); // [8,12) survives
    }

    #[test]
    fn straddling_insert_splits_existing_in_two() {
        let mut map = DiffMap::new();
        map.add(make_rec(0, 20, 1)); // [0, 20)
        map.add(make_rec(8, 4, 2)); // [8, 12) straddles the middle
        assert!(map.is_non_overlapping());
        let recs: Vec<_> = map.iter().collect();
        assert_eq!(recs.len(), 3);
        assert_eq!((recs[0].io_address, recs[0].io_blocks), (0, 8));
        assert_eq!((recs[1].io_address, recs[1].io_blocks), (8, 4));
        assert_eq!((recs[2].io_address, recs[2].io_blocks), (12, 8));
    }

    #[test]
    fn add_split_caps_every_stored_entry() {
        let mut map = DiffMap::new();
        map.add_split(make_rec(0, 10, 9), 4);
        assert!(map.iter().all(|r| r.io_blocks <= 4));
        let total: u32 = map.iter().map(|r| r.io_blocks).sum();
        assert_eq!(total, 10);
    }

    proptest! {
        #[test]
        fn arbitrary_insert_sequence_stays_non_overlapping(
            inserts in proptest::collection::vec((0u64..64, 1u32..8), 1..20),
        ) {
            let mut map = DiffMap::new();
            for (addr, blocks) in inserts {
                map.add(make_rec(addr, blocks, 0xAA));
            }
            prop_assert!(map.is_non_overlapping());
        }

        #[test]
        fn newcomer_always_wins_at_its_own_address(
            addr in 0u64..64,
            blocks in 1u32..8,
        ) {
            let mut map = DiffMap::new();
            map.add(make_rec(addr, blocks, 1));
            map.add(make_rec(addr, blocks, 2));
            let rec = map.iter().find(|r| r.io_address == addr).unwrap();
            prop_assert_eq!(rec.payload[0], 2);
        }
    }
}
