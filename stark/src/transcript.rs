//! Fiat-Shamir transcripts, one per hash back-end.
//!
//! Both are duplex sponges in overwrite mode: absorbed elements are buffered
//! until the rate is filled, each refill runs one permutation with the
//! previous capacity chained in, and squeezes drain the permuted state.
//! Every output is a pure function of the absorbed sequence.

use estark_field::bn254::Bn254Field;
use estark_field::types::{Field, PrimeField64};
use estark_field::FIELD_EXTENSION;

use crate::config::HashConfig;
use crate::hash::poseidon::{self, HASH_SIZE, SPONGE_RATE, SPONGE_WIDTH};
use crate::hash::poseidon_bn128;
use crate::F;

pub trait Transcript<C: HashConfig> {
    fn new(arity: usize, custom: bool) -> Self;

    /// Absorb base-field elements.
    fn put(&mut self, elements: &[F]);

    /// Absorb a Merkle digest.
    fn put_digest(&mut self, digest: &C::Digest);

    /// Squeeze one base-field element.
    fn get_field(&mut self) -> F;

    /// Squeeze one cubic-extension challenge.
    fn get_ext_field(&mut self) -> [F; FIELD_EXTENSION] {
        [self.get_field(), self.get_field(), self.get_field()]
    }

    /// Current sponge state as a digest; used for `hashCommits` pre-hashing.
    fn get_state(&mut self) -> C::Digest;

    /// Squeeze `n` indices in `[0, 2^n_bits)`, consuming 63 bits per
    /// squeezed field element.
    fn get_permutations(&mut self, n: usize, n_bits: usize) -> Vec<u64> {
        let total_bits = n * n_bits;
        let n_fields = (total_bits + 62) / 63;
        let fields: Vec<u64> = (0..n_fields)
            .map(|_| self.get_field().to_canonical_u64())
            .collect();

        let mut res = Vec::with_capacity(n);
        let mut cur_field = 0;
        let mut cur_bit = 0;
        for _ in 0..n {
            let mut a = 0u64;
            for j in 0..n_bits {
                let bit = (fields[cur_field] >> cur_bit) & 1;
                a |= bit << j;
                cur_bit += 1;
                if cur_bit == 63 {
                    cur_bit = 0;
                    cur_field += 1;
                }
            }
            res.push(a);
        }
        res
    }
}

/// Transcript over the width-12 Goldilocks Poseidon.
pub struct TranscriptGL {
    state: [F; SPONGE_WIDTH],
    pending: [F; SPONGE_RATE],
    n_pending: usize,
    out: [F; SPONGE_WIDTH],
    n_out: usize,
}

impl TranscriptGL {
    fn add1(&mut self, input: F) {
        // Any buffered outputs no longer reflect the absorbed sequence.
        self.n_out = 0;
        self.pending[self.n_pending] = input;
        self.n_pending += 1;
        if self.n_pending == SPONGE_RATE {
            self.update_state();
        }
    }

    fn update_state(&mut self) {
        while self.n_pending < SPONGE_RATE {
            self.pending[self.n_pending] = F::ZERO;
            self.n_pending += 1;
        }
        let mut inputs = [F::ZERO; SPONGE_WIDTH];
        inputs[..SPONGE_RATE].copy_from_slice(&self.pending);
        inputs[SPONGE_RATE..].copy_from_slice(&self.state[..HASH_SIZE]);
        self.state = poseidon::poseidon(inputs);
        self.n_pending = 0;
        self.out = self.state;
        self.n_out = SPONGE_WIDTH;
    }
}

impl Transcript<crate::config::GoldilocksConfig> for TranscriptGL {
    fn new(_arity: usize, _custom: bool) -> Self {
        Self {
            state: [F::ZERO; SPONGE_WIDTH],
            pending: [F::ZERO; SPONGE_RATE],
            n_pending: 0,
            out: [F::ZERO; SPONGE_WIDTH],
            n_out: 0,
        }
    }

    fn put(&mut self, elements: &[F]) {
        for &e in elements {
            self.add1(e);
        }
    }

    fn put_digest(&mut self, digest: &[F; HASH_SIZE]) {
        self.put(digest);
    }

    fn get_field(&mut self) -> F {
        if self.n_out == 0 {
            self.update_state();
        }
        let value = self.out[SPONGE_WIDTH - self.n_out];
        self.n_out -= 1;
        value
    }

    fn get_state(&mut self) -> [F; HASH_SIZE] {
        if self.n_pending > 0 {
            self.update_state();
        }
        let mut digest = [F::ZERO; HASH_SIZE];
        digest.copy_from_slice(&self.state[..HASH_SIZE]);
        digest
    }
}

/// Transcript over the BN254-scalar Poseidon. Base elements are packed three
/// per scalar, the same packing the BN128 Merkle leaf hash uses.
pub struct TranscriptBn128 {
    arity: usize,
    state: Bn254Field,
    pending: Vec<Bn254Field>,
    pending_fields: Vec<F>,
    out: Vec<F>,
}

impl TranscriptBn128 {
    fn pack(fields: &[F]) -> Bn254Field {
        let mut limbs = [0u64; 4];
        for (limb, v) in limbs.iter_mut().zip(fields) {
            *limb = v.to_canonical_u64();
        }
        Bn254Field::from_u64_array(limbs)
    }

    fn add1(&mut self, input: Bn254Field) {
        self.out.clear();
        self.pending.push(input);
        if self.pending.len() == self.arity {
            self.update_state();
        }
    }

    fn flush_fields(&mut self) {
        if !self.pending_fields.is_empty() {
            let scalar = Self::pack(&self.pending_fields);
            self.pending_fields.clear();
            self.add1(scalar);
        }
    }

    fn update_state(&mut self) {
        let mut inputs = std::mem::take(&mut self.pending);
        inputs.resize(self.arity, Bn254Field::ZERO);
        self.state = poseidon_bn128::hash(self.state, &inputs);
        self.refill_out();
    }

    fn refill_out(&mut self) {
        // Three base elements per squeezed state scalar, low limbs first.
        let limbs = self.state.to_u64_array();
        self.out = limbs[..FIELD_EXTENSION]
            .iter()
            .map(|&l| F::from_noncanonical_u64(l))
            .collect();
    }
}

impl Transcript<crate::config::Bn128Config> for TranscriptBn128 {
    fn new(arity: usize, _custom: bool) -> Self {
        Self {
            arity,
            state: Bn254Field::ZERO,
            pending: Vec::new(),
            pending_fields: Vec::new(),
            out: Vec::new(),
        }
    }

    fn put(&mut self, elements: &[F]) {
        for &e in elements {
            self.out.clear();
            self.pending_fields.push(e);
            if self.pending_fields.len() == FIELD_EXTENSION {
                self.flush_fields();
            }
        }
    }

    fn put_digest(&mut self, digest: &Bn254Field) {
        self.flush_fields();
        self.add1(*digest);
    }

    fn get_field(&mut self) -> F {
        if self.out.is_empty() {
            self.flush_fields();
            self.update_state();
        }
        self.out.remove(0)
    }

    fn get_state(&mut self) -> Bn254Field {
        self.flush_fields();
        if !self.pending.is_empty() {
            self.update_state();
        }
        self.state
    }
}
