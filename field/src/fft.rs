use estark_util::{log2_strict, reverse_index_bits_in_place};
use rayon::prelude::*;

use crate::types::Field;

pub type FftRootTable<F> = Vec<Vec<F>>;

pub fn fft_root_table<F: Field>(n: usize) -> FftRootTable<F> {
    let lg_n = log2_strict(n);
    // bases[i] = g^2^i, for i = 0, ..., lg_n - 1
    let mut bases = Vec::with_capacity(lg_n);
    let mut base = F::primitive_root_of_unity(lg_n);
    bases.push(base);
    for _ in 1..lg_n {
        base = base.square(); // base = g^2^_
        bases.push(base);
    }

    let mut root_table = Vec::with_capacity(lg_n);
    for lg_m in 1..=lg_n {
        let half_m = 1 << (lg_m - 1);
        let base = bases[lg_n - lg_m];
        let root_row = base.powers().take(half_m.max(2)).collect();
        root_table.push(root_row);
    }
    root_table
}

/// Radix-2 decimation-in-time FFT, Section 32.3 of "Introduction to
/// Algorithms" by Cormen et al.
///
/// The butterfly iteration order is fixed (bit-reversal then layers of
/// sequential butterflies within a column) so results are bit-identical
/// regardless of how callers parallelise across columns.
pub(crate) fn fft_classic<F: Field>(values: &mut [F], root_table: &FftRootTable<F>) {
    reverse_index_bits_in_place(values);

    let n = values.len();
    let lg_n = log2_strict(n);

    assert_eq!(
        root_table.len(),
        lg_n,
        "expected root table of length {lg_n}, but it was {}",
        root_table.len()
    );

    for lg_half_m in 0..lg_n {
        let m = 1 << (lg_half_m + 1); // Subarray size.
        let half_m = m / 2;
        for k in (0..n).step_by(m) {
            for j in 0..half_m {
                let omega = root_table[lg_half_m][j];
                let t = omega * values[k + half_m + j];
                let u = values[k + j];
                values[k + j] = u + t;
                values[k + half_m + j] = u - t;
            }
        }
    }
}

/// Turns forward-FFT output into inverse-FFT output: reverse all values but
/// the first and divide by `n`.
fn ifft_finish<F: Field>(buffer: &mut [F], n_inv: F) {
    let n = buffer.len();
    if n == 1 {
        return;
    }
    buffer[0] *= n_inv;
    buffer[n / 2] *= n_inv;
    for i in 1..(n / 2) {
        let j = n - i;
        let coeffs_i = buffer[j] * n_inv;
        let coeffs_j = buffer[i] * n_inv;
        buffer[i] = coeffs_i;
        buffer[j] = coeffs_j;
    }
}

fn gather_column<F: Field>(buf: &[F], n: usize, cols: usize, c: usize) -> Vec<F> {
    (0..n).map(|r| buf[r * cols + c]).collect()
}

fn scatter_columns<F: Field>(buf: &mut [F], columns: &[Vec<F>], n: usize, cols: usize) {
    buf[..n * cols]
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(r, row)| {
            for (c, col) in columns.iter().enumerate() {
                row[c] = col[r];
            }
        });
}

/// Forward NTT on each of `cols` row-major columns of length `n`, in place.
///
/// Column `i` of the result holds the evaluations, over the order-`n`
/// subgroup, of the polynomial whose coefficients were column `i`.
pub fn ntt_in_place<F: Field>(buf: &mut [F], n: usize, cols: usize) {
    assert_eq!(buf.len(), n * cols, "buffer is not n * cols");
    if n <= 1 || cols == 0 {
        return;
    }
    let root_table = fft_root_table::<F>(n);
    let columns: Vec<Vec<F>> = (0..cols)
        .into_par_iter()
        .map(|c| {
            let mut col = gather_column(buf, n, cols, c);
            fft_classic(&mut col, &root_table);
            col
        })
        .collect();
    scatter_columns(buf, &columns, n, cols);
}

/// Inverse NTT on each of `cols` row-major columns of length `n`, in place.
///
/// After this, column `i` contains the coefficients of the unique
/// degree-<`n` polynomial interpolating the old column `i` on the order-`n`
/// subgroup.
pub fn intt_in_place<F: Field>(buf: &mut [F], n: usize, cols: usize) {
    assert_eq!(buf.len(), n * cols, "buffer is not n * cols");
    if n <= 1 || cols == 0 {
        return;
    }
    let root_table = fft_root_table::<F>(n);
    let n_inv = F::inverse_2exp(log2_strict(n));
    let columns: Vec<Vec<F>> = (0..cols)
        .into_par_iter()
        .map(|c| {
            let mut col = gather_column(buf, n, cols, c);
            fft_classic(&mut col, &root_table);
            ifft_finish(&mut col, n_inv);
            col
        })
        .collect();
    scatter_columns(buf, &columns, n, cols);
}

/// Low-degree extension: interprets each column of `src` as evaluations on
/// the order-`n` subgroup and writes to `dst` its evaluations on the
/// order-`n_ext` coset `shift * <w(log2 n_ext)>`.
pub fn extend_pol<F: Field>(dst: &mut [F], src: &[F], n_ext: usize, n: usize, cols: usize) {
    assert_eq!(src.len(), n * cols, "source is not n * cols");
    assert!(dst.len() >= n_ext * cols, "destination too short");
    assert!(n_ext >= n);
    if cols == 0 {
        return;
    }

    let root_table = fft_root_table::<F>(n);
    let root_table_ext = fft_root_table::<F>(n_ext);
    let n_inv = F::inverse_2exp(log2_strict(n));
    let shift_powers: Vec<F> = F::MULTIPLICATIVE_GROUP_GENERATOR.powers().take(n).collect();

    let columns: Vec<Vec<F>> = (0..cols)
        .into_par_iter()
        .map(|c| {
            let mut col = gather_column(src, n, cols, c);
            fft_classic(&mut col, &root_table);
            ifft_finish(&mut col, n_inv);
            // Shift coefficient j by shift^j, then zero-pad and re-evaluate
            // over the larger domain.
            for (coeff, s) in col.iter_mut().zip(&shift_powers) {
                *coeff *= *s;
            }
            col.resize(n_ext, F::ZERO);
            fft_classic(&mut col, &root_table_ext);
            col
        })
        .collect();
    scatter_columns(dst, &columns, n_ext, cols);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goldilocks_field::GoldilocksField;
    use crate::types::Sample;

    type F = GoldilocksField;

    fn evaluate_naive(coeffs: &[F], point: F) -> F {
        let mut sum = F::ZERO;
        let mut point_power = F::ONE;
        for &c in coeffs {
            sum += c * point_power;
            point_power *= point;
        }
        sum
    }

    #[test]
    fn ntt_then_intt_is_identity() {
        let n = 16;
        let cols = 3;
        let original = F::rand_vec(n * cols);
        let mut buf = original.clone();
        intt_in_place(&mut buf, n, cols);
        ntt_in_place(&mut buf, n, cols);
        assert_eq!(buf, original);
    }

    #[test]
    fn ntt_matches_naive_evaluation() {
        let n = 8;
        let coeffs = F::rand_vec(n);
        let mut buf = coeffs.clone();
        ntt_in_place(&mut buf, n, 1);

        let subgroup = F::two_adic_subgroup(3);
        for (i, &x) in subgroup.iter().enumerate() {
            assert_eq!(buf[i], evaluate_naive(&coeffs, x));
        }
    }

    #[test]
    fn extend_constant_pol() {
        // A constant polynomial stays constant on the shifted coset.
        let n = 8;
        let n_ext = 16;
        let seven = F::from_canonical_u64(7);
        let src = vec![seven; n];
        let mut dst = vec![F::ZERO; n_ext];
        extend_pol(&mut dst, &src, n_ext, n, 1);
        assert_eq!(dst, vec![seven; n_ext]);
    }

    #[test]
    fn extend_pol_round_trip() {
        // iNTT on the coset plus per-coefficient division by shift^j must
        // reproduce the original coefficients, zero-padded.
        let n = 8;
        let n_ext = 32;
        let cols = 2;
        let src = F::rand_vec(n * cols);

        let mut coeffs = src.clone();
        intt_in_place(&mut coeffs, n, cols);

        let mut extended = vec![F::ZERO; n_ext * cols];
        extend_pol(&mut extended, &src, n_ext, n, cols);
        intt_in_place(&mut extended, n_ext, cols);

        let shift_inv = F::MULTIPLICATIVE_GROUP_GENERATOR.inverse();
        let mut s = F::ONE;
        for j in 0..n_ext {
            for c in 0..cols {
                let recovered = extended[j * cols + c] * s;
                let expected = if j < n { coeffs[j * cols + c] } else { F::ZERO };
                assert_eq!(recovered, expected, "coefficient {j} column {c}");
            }
            s *= shift_inv;
        }
    }

    #[test]
    fn extend_pol_agrees_with_naive_coset_evaluation() {
        let n = 8;
        let n_ext = 16;
        let src = F::rand_vec(n);

        let mut coeffs = src.clone();
        intt_in_place(&mut coeffs, n, 1);

        let mut extended = vec![F::ZERO; n_ext];
        extend_pol(&mut extended, &src, n_ext, n, 1);

        let shift = F::MULTIPLICATIVE_GROUP_GENERATOR;
        let w_ext = F::primitive_root_of_unity(4);
        for (i, x) in w_ext.powers().take(n_ext).enumerate() {
            assert_eq!(extended[i], evaluate_naive(&coeffs, shift * x));
        }
    }
}
