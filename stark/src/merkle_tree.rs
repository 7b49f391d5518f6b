//! Leaf-hashed arity-N Merkle trees over row-major column sources.
//!
//! A tree commits to `height` rows of `width` base elements each. Leaves are
//! linear-hashed, internal nodes hash groups of `arity` children, bottom-up
//! and left-to-right, so roots are deterministic regardless of thread count.

use rayon::prelude::*;

use crate::config::HashConfig;
use crate::errors::{StarkError, StarkResult};
use crate::F;

#[derive(Debug, Clone)]
pub struct MerkleTree<C: HashConfig> {
    pub arity: usize,
    pub custom: bool,
    pub height: usize,
    pub width: usize,
    /// The committed rows, kept so queries can reveal whole leaves.
    pub source: Vec<F>,
    /// All digests, one level after another; the last entry is the root.
    nodes: Vec<C::Digest>,
    level_offsets: Vec<usize>,
    level_sizes: Vec<usize>,
}

impl<C: HashConfig> MerkleTree<C> {
    pub fn new(arity: usize, custom: bool, height: usize, width: usize) -> Self {
        assert!(height.is_power_of_two(), "height must be a power of two");
        assert!(arity >= 2);
        Self {
            arity,
            custom,
            height,
            width,
            source: Vec::new(),
            nodes: Vec::new(),
            level_offsets: Vec::new(),
            level_sizes: Vec::new(),
        }
    }

    /// Number of levels between leaf digests and root.
    pub fn proof_length(&self) -> usize {
        Self::proof_length_for(self.height, self.arity)
    }

    pub fn proof_length_for(height: usize, arity: usize) -> usize {
        if height <= 1 {
            return 0;
        }
        let mut levels = 0;
        let mut n = height;
        while n > 1 {
            n = (n + arity - 1) / arity;
            levels += 1;
        }
        levels
    }

    /// Computes all digests bottom-up from `source`.
    pub fn merkelize(&mut self, source: &[F]) -> StarkResult<()> {
        if source.len() != self.height * self.width {
            return Err(StarkError::shape(format!(
                "merkle source has {} elements, expected {} x {}",
                source.len(),
                self.height,
                self.width
            )));
        }
        self.source = source.to_vec();

        let mut nodes: Vec<C::Digest> = Vec::new();
        let mut level_offsets = vec![0];
        let mut level_sizes = vec![self.height];

        let leaves: Vec<C::Digest> = self
            .source
            .par_chunks(self.width.max(1))
            .map(|leaf| C::linear_hash(self.arity, self.custom, leaf))
            .collect();
        nodes.extend(leaves);

        let mut level_start = 0;
        let mut n = self.height;
        while n > 1 {
            let next_n = (n + self.arity - 1) / self.arity;
            let level = &nodes[level_start..level_start + n];
            let parents: Vec<C::Digest> = (0..next_n)
                .into_par_iter()
                .map(|g| {
                    let mut children = vec![C::Digest::default(); self.arity];
                    for (j, child) in children.iter_mut().enumerate() {
                        let idx = g * self.arity + j;
                        if idx < n {
                            *child = level[idx];
                        }
                    }
                    C::hash_node(self.arity, self.custom, &children)
                })
                .collect();
            level_start += n;
            level_offsets.push(level_start);
            level_sizes.push(next_n);
            nodes.extend(parents);
            n = next_n;
        }

        self.nodes = nodes;
        self.level_offsets = level_offsets;
        self.level_sizes = level_sizes;
        Ok(())
    }

    pub fn root(&self) -> C::Digest {
        *self.nodes.last().expect("tree has not been merkelized")
    }

    /// The leaf at `idx` plus, per level, the `arity - 1` sibling digests in
    /// child order with the queried position skipped.
    pub fn group_proof(&self, idx: usize) -> StarkResult<(Vec<F>, Vec<Vec<C::Digest>>)> {
        if idx >= self.height {
            return Err(StarkError::shape(format!(
                "query index {idx} out of range for tree of height {}",
                self.height
            )));
        }
        assert!(!self.nodes.is_empty(), "tree has not been merkelized");

        let values = self.source[idx * self.width..(idx + 1) * self.width].to_vec();

        let mut siblings = Vec::with_capacity(self.proof_length());
        let mut cur = idx;
        for level in 0..self.level_sizes.len() - 1 {
            let offset = self.level_offsets[level];
            let size = self.level_sizes[level];
            let group = cur / self.arity;
            let pos = cur % self.arity;
            let mut sibs = Vec::with_capacity(self.arity - 1);
            for j in 0..self.arity {
                if j == pos {
                    continue;
                }
                let idx_in_level = group * self.arity + j;
                sibs.push(if idx_in_level < size {
                    self.nodes[offset + idx_in_level]
                } else {
                    C::Digest::default()
                });
            }
            siblings.push(sibs);
            cur = group;
        }
        Ok((values, siblings))
    }
}

/// Recomputes the root from a claimed leaf and its sibling path. Returns
/// `false` on malformed paths instead of panicking.
pub fn verify_group_proof<C: HashConfig>(
    root: &C::Digest,
    siblings: &[Vec<C::Digest>],
    idx: usize,
    values: &[F],
    arity: usize,
    custom: bool,
) -> bool {
    let mut value = C::linear_hash(arity, custom, values);
    let mut cur = idx;
    for level in siblings {
        if level.len() != arity - 1 {
            return false;
        }
        let pos = cur % arity;
        let mut children = Vec::with_capacity(arity);
        children.extend_from_slice(&level[..pos]);
        children.push(value);
        children.extend_from_slice(&level[pos..]);
        value = C::hash_node(arity, custom, &children);
        cur /= arity;
    }
    value == *root
}

#[cfg(test)]
mod tests {
    use estark_field::types::{Field, Sample};

    use super::*;
    use crate::config::{Bn128Config, GoldilocksConfig};

    fn f(n: u64) -> F {
        F::from_canonical_u64(n)
    }

    #[test]
    fn four_leaf_tree_proves_and_rejects() {
        // Leaves {1,0,0,0}..{4,0,0,0}, query index 2.
        let mut source = vec![F::ZERO; 16];
        for i in 0..4 {
            source[i * 4] = f(i as u64 + 1);
        }
        let mut tree = MerkleTree::<GoldilocksConfig>::new(2, true, 4, 4);
        tree.merkelize(&source).unwrap();
        let root = tree.root();

        let (values, mut siblings) = tree.group_proof(2).unwrap();
        assert_eq!(values, vec![f(3), F::ZERO, F::ZERO, F::ZERO]);
        assert!(verify_group_proof::<GoldilocksConfig>(
            &root, &siblings, 2, &values, 2, true
        ));

        // Flip one sibling digest.
        siblings[0][0][1] += F::ONE;
        assert!(!verify_group_proof::<GoldilocksConfig>(
            &root, &siblings, 2, &values, 2, true
        ));
        siblings[0][0][1] -= F::ONE;

        // Flip one revealed value.
        let mut bad_values = values.clone();
        bad_values[0] += F::ONE;
        assert!(!verify_group_proof::<GoldilocksConfig>(
            &root, &siblings, 2, &bad_values, 2, true
        ));

        // Wrong index.
        assert!(!verify_group_proof::<GoldilocksConfig>(
            &root, &siblings, 3, &values, 2, true
        ));
    }

    #[test]
    fn all_leaves_verify_gl() {
        let height = 32;
        let width = 9;
        let source = F::rand_vec(height * width);
        let mut tree = MerkleTree::<GoldilocksConfig>::new(2, true, height, width);
        tree.merkelize(&source).unwrap();
        let root = tree.root();
        for i in 0..height {
            let (values, siblings) = tree.group_proof(i).unwrap();
            assert_eq!(siblings.len(), 5);
            assert!(verify_group_proof::<GoldilocksConfig>(
                &root, &siblings, i, &values, 2, true
            ));
        }
    }

    #[test]
    fn all_leaves_verify_bn128_wide() {
        // 64 leaves with arity 16 gives a two-level, unevenly filled tree.
        let height = 64;
        let width = 7;
        let source = F::rand_vec(height * width);
        let mut tree = MerkleTree::<Bn128Config>::new(16, false, height, width);
        tree.merkelize(&source).unwrap();
        let root = tree.root();
        for i in 0..height {
            let (values, siblings) = tree.group_proof(i).unwrap();
            assert_eq!(siblings.len(), 2);
            assert!(verify_group_proof::<Bn128Config>(
                &root, &siblings, i, &values, 16, false
            ));
        }
    }

    #[test]
    fn query_out_of_range_errors() {
        let mut tree = MerkleTree::<GoldilocksConfig>::new(2, true, 4, 2);
        tree.merkelize(&F::rand_vec(8)).unwrap();
        assert!(tree.group_proof(4).is_err());
    }
}
