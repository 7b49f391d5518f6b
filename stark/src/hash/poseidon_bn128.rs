//! Poseidon over the BN254 scalar field with a runtime-sized state, used by
//! the arity-16 Merkle back-end and its transcript.
//!
//! Round constants and the Cauchy MDS matrix are derived once per state
//! width from a fixed-seed ChaCha stream, the same construction the
//! Goldilocks constants were generated with. Prover and verifier share the
//! parameters, so commitments and transcripts stay consistent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use estark_field::bn254::Bn254Field;
use estark_field::types::{Field, Sample};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub const FULL_ROUNDS: usize = 8;
/// Upper bound from the Poseidon paper tables for x^5 over a 254-bit field,
/// valid for every width up to 17.
pub const PARTIAL_ROUNDS: usize = 68;
pub const N_ROUNDS: usize = FULL_ROUNDS + PARTIAL_ROUNDS;

const PARAMS_SEED: u64 = 0x706f736264_u64; // "posbd"

pub struct Bn128Params {
    pub width: usize,
    round_constants: Vec<Bn254Field>,
    mds: Vec<Vec<Bn254Field>>,
}

impl Bn128Params {
    fn generate(width: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(PARAMS_SEED ^ (width as u64));
        let round_constants = (0..width * N_ROUNDS)
            .map(|_| Bn254Field::sample(&mut rng))
            .collect();

        // Cauchy matrix m[i][j] = 1 / (x_i + y_j) with distinct x_i = i and
        // y_j = width + j; every square submatrix is invertible.
        let mds = (0..width)
            .map(|i| {
                (0..width)
                    .map(|j| {
                        Bn254Field::from_canonical_u64((i + width + j) as u64).inverse()
                    })
                    .collect()
            })
            .collect();

        Self {
            width,
            round_constants,
            mds,
        }
    }
}

/// Parameters for each state width, generated on first use and shared
/// read-only afterwards.
pub fn params(width: usize) -> Arc<Bn128Params> {
    static CACHE: OnceLock<Mutex<HashMap<usize, Arc<Bn128Params>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().unwrap();
    guard
        .entry(width)
        .or_insert_with(|| Arc::new(Bn128Params::generate(width)))
        .clone()
}

#[inline]
fn exp5(x: Bn254Field) -> Bn254Field {
    x.square().square() * x
}

fn ark(state: &mut [Bn254Field], params: &Bn128Params, round: usize) {
    for (i, s) in state.iter_mut().enumerate() {
        *s += params.round_constants[round * params.width + i];
    }
}

fn mix(state: &mut [Bn254Field], params: &Bn128Params) {
    let width = params.width;
    let mut result = vec![Bn254Field::ZERO; width];
    for i in 0..width {
        for j in 0..width {
            result[i] += params.mds[i][j] * state[j];
        }
    }
    state.copy_from_slice(&result);
}

/// The Poseidon permutation on a `width`-element state.
pub fn permutation(state: &mut [Bn254Field]) {
    let params = params(state.len());
    let half_full = FULL_ROUNDS / 2;
    let mut round = 0;

    for _ in 0..half_full {
        ark(state, &params, round);
        for s in state.iter_mut() {
            *s = exp5(*s);
        }
        mix(state, &params);
        round += 1;
    }

    for _ in 0..PARTIAL_ROUNDS {
        ark(state, &params, round);
        state[0] = exp5(state[0]);
        mix(state, &params);
        round += 1;
    }

    for _ in 0..half_full {
        ark(state, &params, round);
        for s in state.iter_mut() {
            *s = exp5(*s);
        }
        mix(state, &params);
        round += 1;
    }
}

/// Sponge-style hash of `inputs.len() + 1` state elements: capacity first,
/// then the inputs. Returns the new capacity element.
pub fn hash(capacity: Bn254Field, inputs: &[Bn254Field]) -> Bn254Field {
    let mut state = Vec::with_capacity(inputs.len() + 1);
    state.push(capacity);
    state.extend_from_slice(inputs);
    permutation(&mut state);
    state[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_stable() {
        let a = params(5);
        let b = params(5);
        assert_eq!(a.round_constants, b.round_constants);
        assert_eq!(a.mds, b.mds);
    }

    #[test]
    fn permutation_is_deterministic_and_not_identity() {
        let input: Vec<Bn254Field> = (0..17).map(Bn254Field::from_canonical_u64).collect();
        let mut a = input.clone();
        let mut b = input.clone();
        permutation(&mut a);
        permutation(&mut b);
        assert_eq!(a, b);
        assert_ne!(a, input);
    }

    #[test]
    fn hash_depends_on_every_input() {
        let inputs: Vec<Bn254Field> = (1..=16).map(Bn254Field::from_canonical_u64).collect();
        let base = hash(Bn254Field::ZERO, &inputs);
        for i in 0..inputs.len() {
            let mut tweaked = inputs.clone();
            tweaked[i] += Bn254Field::ONE;
            assert_ne!(hash(Bn254Field::ZERO, &tweaked), base, "input {i}");
        }
        assert_ne!(hash(Bn254Field::ONE, &inputs), base);
    }
}
