#![allow(clippy::needless_range_loop)]

pub fn bits_u64(n: u64) -> usize {
    (64 - n.leading_zeros()) as usize
}

pub const fn ceil_div_usize(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Computes `ceil(log_2(n))`.
#[must_use]
pub fn log2_ceil(n: usize) -> usize {
    (usize::BITS - n.saturating_sub(1).leading_zeros()) as usize
}

/// Computes `log_2(n)`, panicking if `n` is not a power of two.
pub fn log2_strict(n: usize) -> usize {
    let res = n.trailing_zeros();
    assert!(n.wrapping_shr(res) == 1, "Not a power of two: {n}");
    res as usize
}

/// Reverses the `num_bits` low bits of `i`.
#[inline]
pub const fn reverse_bits(i: usize, num_bits: usize) -> usize {
    i.reverse_bits()
        .wrapping_shr(usize::BITS - num_bits as u32)
}

/// Permutes `arr` such that each index is mapped to its bit-reverse.
///
/// The butterfly ordering of the NTT relies on this being the plain
/// index-reverse permutation; results must not depend on chunking.
pub fn reverse_index_bits_in_place<T>(arr: &mut [T]) {
    let n = arr.len();
    let lb_n = log2_strict(n);
    for src in 0..n {
        let dst = reverse_bits(src, lb_n);
        if src < dst {
            arr.swap(src, dst);
        }
    }
}

/// Out-of-place variant of [`reverse_index_bits_in_place`].
pub fn reverse_index_bits<T: Copy>(arr: &[T]) -> Vec<T> {
    let n = arr.len();
    let lb_n = log2_strict(n);
    (0..n).map(|i| arr[reverse_bits(i, lb_n)]).collect()
}

/// Transposes a row-major `w x h` matrix of fixed-size records into
/// column-major order. `record` is the number of `T`s per cell.
pub fn transpose_records<T: Copy>(dst: &mut [T], src: &[T], w: usize, h: usize, record: usize) {
    assert_eq!(src.len(), w * h * record);
    assert_eq!(dst.len(), src.len());
    for i in 0..w {
        for j in 0..h {
            let fi = (j * w + i) * record;
            let di = (i * h + j) * record;
            dst[di..di + record].copy_from_slice(&src[fi..fi + record]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log2_strict() {
        assert_eq!(log2_strict(1), 0);
        assert_eq!(log2_strict(2), 1);
        assert_eq!(log2_strict(1 << 18), 18);
    }

    #[test]
    #[should_panic]
    fn test_log2_strict_zero() {
        log2_strict(0);
    }

    #[test]
    #[should_panic]
    fn test_log2_strict_nonpower_2() {
        log2_strict(0x78c341c65ae6d262);
    }

    #[test]
    fn test_reverse_index_bits() {
        assert_eq!(reverse_index_bits(&[10, 20, 30, 40]), vec![10, 30, 20, 40]);

        let mut arr: Vec<usize> = (0..64).collect();
        reverse_index_bits_in_place(&mut arr);
        for (i, &x) in arr.iter().enumerate() {
            assert_eq!(x, reverse_bits(i, 6));
        }
    }

    #[test]
    fn test_transpose_records() {
        // 2x2 matrix of 3-element records.
        let src = [1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4];
        let mut dst = [0; 12];
        transpose_records(&mut dst, &src, 2, 2, 3);
        assert_eq!(dst, [1, 1, 1, 3, 3, 3, 2, 2, 2, 4, 4, 4]);
    }
}
