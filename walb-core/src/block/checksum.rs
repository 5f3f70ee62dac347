//! The rolling 32-bit checksum used by both wlog and wdiff records.
//!
//! The algorithm treats the buffer as a stream of little-endian `u32` words
//! (the tail, if any, is zero-padded), seeds the accumulator with a
//! device-wide `salt`, sums modulo 2^32, and finalizes with a two's
//! complement negation. Because [`Checksum::update`] zero-pads a trailing
//! partial word on every call, hashing `a` then `b` incrementally only
//! equals hashing `a ++ b` in one call when `a`'s length is a multiple of
//! 4 bytes — which holds for every span this crate ever feeds it, since
//! records and payloads are always whole logical blocks.

/// Incremental checksum accumulator: seed it, feed it spans in order,
/// finalize once.
#[derive(Debug, Clone, Copy)]
pub struct Checksum {
    acc: u32,
}

impl Checksum {
    #[must_use]
    pub const fn new(salt: u32) -> Self {
        Self { acc: salt }
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut chunks = data.chunks_exact(4);
        for chunk in &mut chunks {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.acc = self.acc.wrapping_add(word);
        }
        let rem = chunks.remainder();
        if !rem.is_empty() {
            let mut buf = [0u8; 4];
            buf[..rem.len()].copy_from_slice(rem);
            let word = u32::from_le_bytes(buf);
            self.acc = self.acc.wrapping_add(word);
        }
    }

    #[must_use]
    pub const fn finish(self) -> u32 {
        (!self.acc).wrapping_add(1)
    }
}

/// One-shot checksum of a single buffer, seeded with `salt`.
#[must_use]
pub fn checksum(salt: u32, data: &[u8]) -> u32 {
    let mut hasher = Checksum::new(salt);
    hasher.update(data);
    hasher.finish()
}

/// Verify that `data` checksums to `expected` under `salt`.
#[must_use]
pub fn verify(salt: u32, data: &[u8], expected: u32) -> bool {
    checksum(salt, data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::block::LB_SIZE;

    #[test]
    fn empty_buffer_is_just_negated_salt() {
        let h = Checksum::new(0x1234);
        assert_eq!(h.finish(), (!0x1234u32).wrapping_add(1));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog, 1234567";
        let salt = 0xDEAD_BEEF;

        let one_shot = checksum(salt, data);

        // Split on a 4-byte boundary: update() only zero-pads a trailing
        // partial word, so a mid-stream split must land on a word boundary
        // for the incremental and one-shot results to agree.
        let mut inc = Checksum::new(salt);
        inc.update(&data[..8]);
        inc.update(&data[8..]);
        assert_eq!(inc.finish(), one_shot);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let data = vec![0xAAu8; 37];
        let salt = 7;
        let original = checksum(salt, &data);

        let mut flipped = data.clone();
        flipped[5] ^= 0x01;
        let changed = checksum(salt, &flipped);

        assert_ne!(original, changed);
    }

    proptest! {
        #[test]
        fn checksum_is_associative_over_concatenation(
            a_blocks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), LB_SIZE as usize), 0..4),
            b_blocks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), LB_SIZE as usize), 0..4),
            salt in any::<u32>(),
        ) {
            // update() zero-pads a trailing partial word on every call, so
            // associativity only holds at the granularity the checksum is
            // ever actually fed in production: whole logical blocks.
            let a: Vec<u8> = a_blocks.into_iter().flatten().collect();
            let b: Vec<u8> = b_blocks.into_iter().flatten().collect();

            let mut combined = a.clone();
            combined.extend_from_slice(&b);
            let whole = checksum(salt, &combined);

            let mut inc = Checksum::new(salt);
            inc.update(&a);
            inc.update(&b);
            prop_assert_eq!(inc.finish(), whole);
        }

        #[test]
        fn any_single_bit_flip_changes_checksum(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            salt in any::<u32>(),
            bit in 0u32..8,
        ) {
            let idx = 0usize;
            let original = checksum(salt, &data);
            let mut flipped = data.clone();
            flipped[idx] ^= 1 << bit;
            prop_assert_ne!(checksum(salt, &flipped), original);
        }
    }
}
