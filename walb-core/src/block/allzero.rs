//! All-zero region detection, used by the log→diff converter to emit
//! `ALLZERO` diff records instead of physical zero payloads.

/// Returns `true` if every byte in `data` is zero.
#[must_use]
pub fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_is_all_zero() {
        assert!(is_all_zero(&[]));
    }

    #[test]
    fn zeroed_buffer_is_all_zero() {
        assert!(is_all_zero(&[0u8; 4096]));
    }

    #[test]
    fn single_nonzero_byte_fails() {
        let mut buf = vec![0u8; 4096];
        buf[4095] = 1;
        assert!(!is_all_zero(&buf));
    }

    proptest! {
        #[test]
        fn any_nonzero_byte_anywhere_fails(
            len in 1usize..256,
            idx in 0usize..256,
        ) {
            let idx = idx % len;
            let mut buf = vec![0u8; len];
            buf[idx] = 1;
            prop_assert!(!is_all_zero(&buf));
        }
    }
}
