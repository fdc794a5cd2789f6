/// RTP sequence number arithmetic
///
/// Sequence numbers are 16 bits wide and wrap modulo 65536. Two values are
/// ordered by their signed distance, which is correct as long as the real gap
/// between them stays under half the sequence space.

/// Signed distance from `a` to `b`.
///
/// Positive when `b` is newer than `a`, negative when `b` is older, zero when
/// they are equal. A distance of exactly 0x8000 is reported as negative.
#[inline]
pub fn compare(a: u16, b: u16) -> i16 {
    b.wrapping_sub(a) as i16
}

/// Check if seq_a is before seq_b (handles wraparound)
#[inline]
pub fn is_before(seq_a: u16, seq_b: u16) -> bool {
    compare(seq_a, seq_b) > 0
}

/// Check if seq_a is after seq_b (handles wraparound)
#[inline]
pub fn is_after(seq_a: u16, seq_b: u16) -> bool {
    compare(seq_a, seq_b) < 0
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Ordering is antisymmetric for any gap under half the space
        #[test]
        fn antisymmetric(a in any::<u16>(), gap in 1u16..0x8000) {
            let b = a.wrapping_add(gap);
            prop_assert!(is_before(a, b));
            prop_assert!(is_after(b, a));
            prop_assert_eq!(compare(a, b), gap as i16);
            prop_assert_eq!(compare(b, a), -(gap as i16));
        }
    }
}
