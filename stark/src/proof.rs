//! The structured FRI proof object produced by the prover and consumed by
//! the verifier. JSON serialisation happens at the edge via serde.

use serde::{Deserialize, Serialize};

use crate::config::HashConfig;
use crate::stark_info::StarkInfo;
use crate::{F, FIELD_EXTENSION};

/// A revealed Merkle leaf plus its sibling path, one `Vec` of `arity - 1`
/// digests per level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(bound = "")]
pub struct MerkleGroupProof<C: HashConfig> {
    pub values: Vec<F>,
    pub siblings: Vec<Vec<C::Digest>>,
}

/// One FRI folding step: the committed root of the folded polynomial and,
/// per query, the transposed group the fold was checked against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(bound = "")]
pub struct FriStepProof<C: HashConfig> {
    pub root: C::Digest,
    pub queries: Vec<MerkleGroupProof<C>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(bound = "")]
pub struct Proof<C: HashConfig> {
    pub airgroup_id: usize,
    pub air_id: usize,

    /// Stage roots `1..=nStages+1`, followed by custom-commit roots.
    pub roots: Vec<C::Digest>,

    /// One extension element per `evMap` entry.
    pub evals: Vec<[F; FIELD_EXTENSION]>,

    pub airgroup_values: Vec<[F; FIELD_EXTENSION]>,
    pub air_values: Vec<[F; FIELD_EXTENSION]>,

    /// Per query, one group proof per committed tree, in tree order: stages
    /// `1..=nStages+1`, the constant tree, then custom commits.
    pub queries: Vec<Vec<MerkleGroupProof<C>>>,

    /// One entry per FRI step except the last.
    pub fri_steps: Vec<FriStepProof<C>>,

    /// The last folded polynomial, in full.
    pub final_pol: Vec<[F; FIELD_EXTENSION]>,

    pub publics: Vec<F>,
}

impl<C: HashConfig> Proof<C> {
    pub fn new(stark_info: &StarkInfo) -> Self {
        let n_queries = stark_info.stark_struct.n_queries;
        let last_bits = stark_info.stark_struct.steps.last().map(|s| s.n_bits).unwrap_or(0);
        Proof {
            airgroup_id: stark_info.airgroup_id,
            air_id: stark_info.air_id,
            roots: Vec::new(),
            evals: vec![[F::default(); FIELD_EXTENSION]; stark_info.ev_map.len()],
            airgroup_values: vec![
                [F::default(); FIELD_EXTENSION];
                stark_info.airgroup_values_map.len()
            ],
            air_values: vec![[F::default(); FIELD_EXTENSION]; stark_info.air_values_map.len()],
            queries: vec![Vec::new(); n_queries],
            fri_steps: Vec::new(),
            final_pol: vec![[F::default(); FIELD_EXTENSION]; 1 << last_bits],
            publics: Vec::new(),
        }
    }

    /// The index of the constant tree inside `queries[q]`.
    pub fn const_tree_index(stark_info: &StarkInfo) -> usize {
        stark_info.n_stages + 1
    }

    /// The index of custom commit `c` inside `queries[q]`.
    pub fn custom_tree_index(stark_info: &StarkInfo, c: usize) -> usize {
        stark_info.n_stages + 2 + c
    }
}
