use std::fmt::Debug;

use estark_field::bn254::Bn254Field;
use estark_field::types::{Field, PrimeField64};
use estark_field::FIELD_EXTENSION;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::hash::poseidon;
use crate::hash::poseidon_bn128;
use crate::transcript::{Transcript, TranscriptBn128, TranscriptGL};
use crate::F;

/// A Merkle/transcript hash back-end. The prover pipeline is generic over
/// this; the two implementations are Poseidon-Goldilocks with arity-2 trees
/// and Poseidon-BN128 with wide trees and single-scalar digests.
pub trait HashConfig: 'static + Copy + Clone + Debug + Eq + Send + Sync + Default {
    type Digest: Copy
        + Clone
        + Eq
        + Debug
        + Default
        + Send
        + Sync
        + Serialize
        + DeserializeOwned;

    type Transcript: Transcript<Self>;

    /// The `verificationHashType` tag this back-end answers to.
    const NAME: &'static str;

    /// Digest of one Merkle leaf of `width` base elements.
    fn linear_hash(arity: usize, custom: bool, values: &[F]) -> Self::Digest;

    /// Digest of a full group of `arity` child digests.
    fn hash_node(arity: usize, custom: bool, children: &[Self::Digest]) -> Self::Digest;
}

/// Poseidon over Goldilocks: 4-element digests, arity-2 trees.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GoldilocksConfig;

impl HashConfig for GoldilocksConfig {
    type Digest = [F; poseidon::HASH_SIZE];
    type Transcript = TranscriptGL;

    const NAME: &'static str = "GL";

    fn linear_hash(_arity: usize, _custom: bool, values: &[F]) -> Self::Digest {
        poseidon::linear_hash(values)
    }

    fn hash_node(arity: usize, _custom: bool, children: &[Self::Digest]) -> Self::Digest {
        assert_eq!(arity, 2, "the Goldilocks back-end builds arity-2 trees");
        assert_eq!(children.len(), 2);
        poseidon::hash_node(children[0], children[1])
    }
}

/// Poseidon over the BN254 scalar field: single-scalar digests, wide trees
/// (arity 16 by default).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Bn128Config;

impl HashConfig for Bn128Config {
    type Digest = Bn254Field;
    type Transcript = TranscriptBn128;

    const NAME: &'static str = "BN128";

    fn linear_hash(arity: usize, custom: bool, values: &[F]) -> Self::Digest {
        // Short leaves are packed straight into one scalar.
        if values.len() <= 4 {
            let mut limbs = [0u64; 4];
            for (limb, v) in limbs.iter_mut().zip(values) {
                *limb = v.to_canonical_u64();
            }
            return Bn254Field::from_u64_array(limbs);
        }

        // Three base elements per scalar, then a capacity-chained sponge in
        // groups of `arity`.
        let packed: Vec<Bn254Field> = values
            .chunks(FIELD_EXTENSION)
            .map(|chunk| {
                let mut limbs = [0u64; 4];
                for (limb, v) in limbs.iter_mut().zip(chunk) {
                    *limb = v.to_canonical_u64();
                }
                Bn254Field::from_u64_array(limbs)
            })
            .collect();

        let mut result = Bn254Field::ZERO;
        for chunk in packed.chunks(arity) {
            if chunk.len() == arity || !custom {
                result = poseidon_bn128::hash(result, chunk);
            } else {
                // Custom trees pad short trailing chunks to the full state
                // width instead of shrinking the permutation.
                let mut padded = vec![Bn254Field::ZERO; arity];
                padded[..chunk.len()].copy_from_slice(chunk);
                result = poseidon_bn128::hash(result, &padded);
            }
        }
        result
    }

    fn hash_node(arity: usize, _custom: bool, children: &[Self::Digest]) -> Self::Digest {
        assert_eq!(children.len(), arity);
        poseidon_bn128::hash(Bn254Field::ZERO, children)
    }
}
