//! 16-bit one's-complement checksum.
//!
//! The input is read as a sequence of **little-endian** 16-bit words.  An odd
//! trailing byte is padded with a zero byte on the right; the pad exists only
//! inside the computation and is never transmitted.  Words are summed with
//! wraparound at 16 bits and the complement of the sum is the checksum.
//!
//! Word order is fixed by the algorithm, not by the host, so the result is
//! identical on every platform.
//!
//! # Weak spots
//!
//! Any change that alters the 16-bit sum is detected, which covers every
//! single-bit flip and every single-byte change.  Changes that cancel inside
//! the sum go unnoticed: swapping two aligned words, or adding `d` to one word
//! and subtracting `d` from another.

/// Compute the checksum of `data`.
pub fn compute(data: &[u8]) -> u16 {
    !sum_words(data)
}

/// Return `true` if `checksum` matches the checksum of `data`.
pub fn verify(checksum: u16, data: &[u8]) -> bool {
    compute(data) == checksum
}

fn sum_words(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let mut sum = words
        .by_ref()
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));

    // Odd trailing byte: zero pad on the right, i.e. the low byte of an LE word.
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u16::from(*last));
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_is_all_ones() {
        assert_eq!(compute(&[]), 0xffff);
    }

    #[test]
    fn words_are_little_endian() {
        // 0x0201 + 0x0403 = 0x0604
        assert_eq!(compute(&[0x01, 0x02, 0x03, 0x04]), !0x0604);
    }

    #[test]
    fn odd_length_is_zero_padded() {
        assert_eq!(compute(&[0x01, 0x02, 0x03]), compute(&[0x01, 0x02, 0x03, 0x00]));
    }

    #[test]
    fn sum_wraps_at_sixteen_bits() {
        // 0xffff + 0x0002 wraps to 0x0001, no end-around carry.
        assert_eq!(compute(&[0xff, 0xff, 0x02, 0x00]), !0x0001);
    }

    #[test]
    fn different_text_fails_verification() {
        let cs = compute(b"original string");
        assert!(!verify(cs, b"other string"));
    }

    #[test]
    fn swapped_words_are_not_detected() {
        // Documented weak spot: addition is commutative.
        let cs = compute(b"abcd");
        assert!(verify(cs, b"cdab"));
    }

    proptest! {
        #[test]
        fn verify_accepts_own_checksum(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            prop_assert!(verify(compute(&data), &data));
        }

        #[test]
        fn single_bit_flip_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..2048),
            idx in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let cs = compute(&data);
            let mut flipped = data.clone();
            let i = idx.index(flipped.len());
            flipped[i] ^= 1 << bit;
            prop_assert!(!verify(cs, &flipped));
        }
    }
}
