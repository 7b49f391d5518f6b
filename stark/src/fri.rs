//! FRI folding, per-step commitment and query answering.

use estark_field::fft::intt_in_place;
use estark_field::types::Field;
use estark_util::transpose_records;
use rayon::prelude::*;

use crate::config::HashConfig;
use crate::errors::{StarkError, StarkResult};
use crate::merkle_tree::MerkleTree;
use crate::proof::MerkleGroupProof;
use crate::{E, F, FIELD_EXTENSION};

/// Folds the FRI polynomial in place from `2^prev_bits` evaluations down to
/// `2^current_bits`.
///
/// Each group of `2^(prev_bits - current_bits)` evaluations belonging to one
/// target row is interpolated (iNTT over the group), its coefficients are
/// unshifted by the group's coset offset, and the result is evaluated at the
/// step challenge. Step 0 is the identity: the polynomial is already on the
/// first-step domain.
pub fn fold(
    step: usize,
    pol: &mut [F],
    challenge: &[F; FIELD_EXTENSION],
    n_bits_ext: usize,
    prev_bits: usize,
    current_bits: usize,
) {
    if step == 0 {
        return;
    }

    let pol_bits = prev_bits;
    let pol2_n = 1usize << current_bits;
    let n_x = (1usize << pol_bits) / pol2_n;

    // shift^(-2^(n_bits_ext - prev_bits)): the folding domain's coset shift.
    let mut pol_shift_inv = F::coset_shift().inverse();
    for _ in 0..n_bits_ext - prev_bits {
        pol_shift_inv = pol_shift_inv.square();
    }
    let w_inv = F::primitive_root_of_unity(pol_bits).inverse();
    let alpha = E::new(challenge[0], challenge[1], challenge[2]);

    let folded: Vec<[F; FIELD_EXTENSION]> = (0..pol2_n)
        .into_par_iter()
        .map(|g| {
            // Gather the group, one evaluation per coset of the target row.
            let mut ppar = vec![F::ZERO; n_x * FIELD_EXTENSION];
            for i in 0..n_x {
                let src = (i * pol2_n + g) * FIELD_EXTENSION;
                ppar[i * FIELD_EXTENSION..(i + 1) * FIELD_EXTENSION]
                    .copy_from_slice(&pol[src..src + FIELD_EXTENSION]);
            }
            intt_in_place(&mut ppar, n_x, FIELD_EXTENSION);

            // Scale coefficient k by sinv_g^k, sinv_g the inverse shift of
            // this group's coset.
            let sinv = pol_shift_inv * w_inv.exp_u64(g as u64);
            let mut r = F::ONE;
            for i in 0..n_x {
                for c in 0..FIELD_EXTENSION {
                    ppar[i * FIELD_EXTENSION + c] *= r;
                }
                r *= sinv;
            }

            eval_pol(&ppar, n_x, alpha).to_basefield_array()
        })
        .collect();

    for (g, value) in folded.iter().enumerate() {
        pol[g * FIELD_EXTENSION..(g + 1) * FIELD_EXTENSION].copy_from_slice(value);
    }
}

/// Horner evaluation of an extension-coefficient polynomial.
fn eval_pol(coeffs: &[F], degree: usize, x: E) -> E {
    if degree == 0 {
        return E::ZERO;
    }
    let mut res = E::from_basefield_slice(&coeffs[(degree - 1) * FIELD_EXTENSION..]);
    for i in (0..degree - 1).rev() {
        res = res * x + E::from_basefield_slice(&coeffs[i * FIELD_EXTENSION..]);
    }
    res
}

/// Commits one intermediate FRI polynomial: groups belonging to the same
/// next-step row become contiguous leaves of `2^(current-next) * 3` base
/// elements.
pub fn merkelize<C: HashConfig>(
    tree: &mut MerkleTree<C>,
    pol: &[F],
    current_bits: usize,
    next_bits: usize,
) -> StarkResult<C::Digest> {
    let n_groups = 1usize << next_bits;
    let group_size = (1usize << current_bits) / n_groups;

    let mut transposed = vec![F::ZERO; (1 << current_bits) * FIELD_EXTENSION];
    transpose_records(
        &mut transposed,
        &pol[..(1 << current_bits) * FIELD_EXTENSION],
        n_groups,
        group_size,
        FIELD_EXTENSION,
    );

    tree.merkelize(&transposed)?;
    Ok(tree.root())
}

/// Opens every committed tree at the given query indices.
pub fn prove_queries<C: HashConfig>(
    queries: &[u64],
    trees: &[&MerkleTree<C>],
) -> StarkResult<Vec<Vec<MerkleGroupProof<C>>>> {
    queries
        .iter()
        .map(|&q| {
            trees
                .iter()
                .map(|tree| {
                    let (values, siblings) = tree.group_proof(q as usize)?;
                    Ok(MerkleGroupProof { values, siblings })
                })
                .collect()
        })
        .collect()
}

/// Opens one FRI-step tree; indices wrap to the folded domain size.
pub fn prove_fri_queries<C: HashConfig>(
    queries: &[u64],
    current_bits: usize,
    tree: &MerkleTree<C>,
) -> StarkResult<Vec<MerkleGroupProof<C>>> {
    queries
        .iter()
        .map(|&q| {
            let idx = (q as usize) % (1 << current_bits);
            let (values, siblings) = tree.group_proof(idx)?;
            Ok(MerkleGroupProof { values, siblings })
        })
        .collect()
}

/// Verifier-side fold of one revealed group: recomputes the folded value at
/// position `idx` of the next step from the `group_size * 3` revealed
/// values.
pub fn verify_fold(
    values: &[F],
    n_bits_ext: usize,
    prev_bits: usize,
    current_bits: usize,
    challenge: &[F; FIELD_EXTENSION],
    idx: usize,
) -> StarkResult<E> {
    let n_x = (1usize << prev_bits) / (1usize << current_bits);
    if values.len() != n_x * FIELD_EXTENSION {
        return Err(StarkError::shape(format!(
            "fri group has {} values, expected {}",
            values.len(),
            n_x * FIELD_EXTENSION
        )));
    }

    let mut coeffs = values.to_vec();
    intt_in_place(&mut coeffs, n_x, FIELD_EXTENSION);

    let mut shift = F::coset_shift();
    for _ in 0..n_bits_ext - prev_bits {
        shift = shift.square();
    }
    let s = shift * F::primitive_root_of_unity(prev_bits).exp_u64(idx as u64);
    let sinv = s
        .try_inverse()
        .ok_or(StarkError::InverseOfZero { exp_id: 0 })?;

    let alpha = E::new(challenge[0], challenge[1], challenge[2]);
    Ok(eval_pol(&coeffs, n_x, alpha.mul_by_base(sinv)))
}

#[cfg(test)]
mod tests {
    use estark_field::fft::extend_pol;
    use estark_field::types::Sample;

    use super::*;

    /// Evaluations on the shifted coset of size `2^bits` of a random
    /// degree-bound polynomial.
    fn random_coset_evals(n_bits: usize, n_bits_ext: usize) -> Vec<F> {
        let n = 1 << n_bits;
        let n_ext = 1 << n_bits_ext;
        // Extension components are three independent base columns.
        let src = F::rand_vec(n * FIELD_EXTENSION);
        let mut dst = vec![F::ZERO; n_ext * FIELD_EXTENSION];
        extend_pol(&mut dst, &src, n_ext, n, FIELD_EXTENSION);
        dst
    }

    #[test]
    fn fold_preserves_low_degree() {
        // Folding evaluations of a low-degree polynomial yields evaluations
        // of a low-degree polynomial on the smaller coset; checked by
        // interpolating and looking at the coefficient tail.
        let n_bits_ext = 6;
        let current_bits = 4;
        let mut pol = random_coset_evals(3, n_bits_ext);

        let challenge = [F::rand(), F::rand(), F::rand()];
        fold(1, &mut pol, &challenge, n_bits_ext, n_bits_ext, current_bits);

        let folded = &mut pol[..(1 << current_bits) * FIELD_EXTENSION];
        // Un-shift: values live on the coset shift^(2^(ext-current)).
        let mut shift = F::coset_shift();
        for _ in 0..n_bits_ext - current_bits {
            shift = shift.square();
        }
        intt_in_place(folded, 1 << current_bits, FIELD_EXTENSION);
        let shift_inv = shift.inverse();
        let mut s = F::ONE;
        for i in 0..1 << current_bits {
            for c in 0..FIELD_EXTENSION {
                folded[i * FIELD_EXTENSION + c] *= s;
            }
            s *= shift_inv;
        }
        // Source degree < 8 split into 2^(6-4)=4 sub-polynomials leaves the
        // folded degree < 2; everything above must vanish.
        for i in 2..1 << current_bits {
            for c in 0..FIELD_EXTENSION {
                assert_eq!(folded[i * FIELD_EXTENSION + c], F::ZERO, "coeff {i}.{c}");
            }
        }
    }

    #[test]
    fn verify_fold_matches_prover_fold() {
        let n_bits_ext = 5;
        let current_bits = 3;
        let pol = random_coset_evals(3, n_bits_ext);

        let challenge = [F::rand(), F::rand(), F::rand()];
        let mut folded = pol.clone();
        fold(
            1,
            &mut folded,
            &challenge,
            n_bits_ext,
            n_bits_ext,
            current_bits,
        );

        let n_groups = 1usize << current_bits;
        let group_size = (1 << n_bits_ext) / n_groups;
        for idx in 0..n_groups {
            // The transposed group the prover would commit for this index.
            let mut group = Vec::new();
            for j in 0..group_size {
                let src = (j * n_groups + idx) * FIELD_EXTENSION;
                group.extend_from_slice(&pol[src..src + FIELD_EXTENSION]);
            }
            let value = verify_fold(
                &group,
                n_bits_ext,
                n_bits_ext,
                current_bits,
                &challenge,
                idx,
            )
            .unwrap();
            assert_eq!(
                value.to_basefield_array(),
                [
                    folded[idx * FIELD_EXTENSION],
                    folded[idx * FIELD_EXTENSION + 1],
                    folded[idx * FIELD_EXTENSION + 2]
                ]
            );
        }
    }

    #[test]
    fn eval_pol_is_horner() {
        let coeffs = F::rand_vec(4 * FIELD_EXTENSION);
        let x = E::rand();
        let mut expected = E::ZERO;
        let mut power = E::ONE;
        for i in 0..4 {
            expected += E::from_basefield_slice(&coeffs[i * FIELD_EXTENSION..]) * power;
            power *= x;
        }
        assert_eq!(eval_pol(&coeffs, 4, x), expected);
    }
}
