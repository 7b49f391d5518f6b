use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num::BigUint;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Sampling of uniformly random field elements, used by tests and by the
/// seeded Poseidon parameter generation.
pub trait Sample: Sized {
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized;

    fn rand() -> Self {
        Self::sample(&mut rand::thread_rng())
    }

    fn rand_vec(n: usize) -> Vec<Self> {
        (0..n).map(|_| Self::rand()).collect()
    }
}

pub trait Field:
    'static
    + Copy
    + Eq
    + Hash
    + Send
    + Sync
    + Debug
    + Default
    + Display
    + Neg<Output = Self>
    + Add<Self, Output = Self>
    + AddAssign<Self>
    + Sum
    + Sub<Self, Output = Self>
    + SubAssign<Self>
    + Mul<Self, Output = Self>
    + MulAssign<Self>
    + Product
    + Div<Self, Output = Self>
    + DivAssign<Self>
    + Serialize
    + DeserializeOwned
{
    const ZERO: Self;
    const ONE: Self;
    const TWO: Self;
    const NEG_ONE: Self;

    /// The 2-adicity of the multiplicative group order.
    const TWO_ADICITY: usize;

    /// Generator of the full multiplicative group. Also serves as the coset
    /// shift for low-degree extensions: it lies outside every power-of-two
    /// subgroup.
    const MULTIPLICATIVE_GROUP_GENERATOR: Self;

    /// Generator of the largest power-of-two subgroup.
    const POWER_OF_TWO_GENERATOR: Self;

    fn order() -> BigUint;

    fn try_inverse(&self) -> Option<Self>;

    fn inverse(&self) -> Self {
        self.try_inverse().expect("tried to invert zero")
    }

    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn is_one(&self) -> bool {
        *self == Self::ONE
    }

    fn square(&self) -> Self {
        *self * *self
    }

    fn cube(&self) -> Self {
        self.square() * *self
    }

    fn double(&self) -> Self {
        *self + *self
    }

    fn from_canonical_u64(n: u64) -> Self;

    fn from_canonical_usize(n: usize) -> Self {
        Self::from_canonical_u64(n as u64)
    }

    fn from_bool(b: bool) -> Self {
        Self::from_canonical_u64(b as u64)
    }

    fn from_noncanonical_biguint(n: BigUint) -> Self;

    /// Exponentiation by squaring.
    fn exp_u64(&self, power: u64) -> Self {
        let mut current = *self;
        let mut product = Self::ONE;
        for j in 0..estark_util::bits_u64(power) {
            if (power >> j & 1) != 0 {
                product *= current;
            }
            current = current.square();
        }
        product
    }

    fn exp_power_of_2(&self, power_log: usize) -> Self {
        let mut res = *self;
        for _ in 0..power_log {
            res = res.square();
        }
        res
    }

    /// `1 / 2^exp`.
    fn inverse_2exp(exp: usize) -> Self {
        Self::TWO.exp_u64(exp as u64).inverse()
    }

    /// A primitive `2^n_log`-th root of unity.
    fn primitive_root_of_unity(n_log: usize) -> Self {
        assert!(n_log <= Self::TWO_ADICITY);
        let base = Self::POWER_OF_TWO_GENERATOR;
        base.exp_power_of_2(Self::TWO_ADICITY - n_log)
    }

    /// The subgroup generated by [`Field::primitive_root_of_unity`], in
    /// cyclic order starting from one.
    fn two_adic_subgroup(n_log: usize) -> Vec<Self> {
        let generator = Self::primitive_root_of_unity(n_log);
        generator.powers().take(1 << n_log).collect()
    }

    /// An iterator over `1, x, x^2, ...`.
    fn powers(&self) -> Powers<Self> {
        Powers {
            base: *self,
            current: Self::ONE,
        }
    }
}

/// A prime field of order less than `2^64`, with a canonical `u64` form.
pub trait PrimeField64: Field {
    const ORDER: u64;

    fn to_canonical_u64(&self) -> u64;

    fn to_noncanonical_u64(&self) -> u64;

    fn from_noncanonical_u64(n: u64) -> Self;

    fn from_noncanonical_u128(n: u128) -> Self;
}

/// An iterator over the powers of a field element.
#[derive(Clone, Debug)]
pub struct Powers<F: Field> {
    base: F,
    current: F,
}

impl<F: Field> Iterator for Powers<F> {
    type Item = F;

    fn next(&mut self) -> Option<F> {
        let result = self.current;
        self.current *= self.base;
        Some(result)
    }
}

/// Inverts every element of `x` with a single field inversion and
/// `3 * x.len()` multiplications (Montgomery's trick). Returns `None` if any
/// element is zero.
pub fn try_batch_inverse<F: Field>(x: &[F]) -> Option<Vec<F>> {
    let n = x.len();
    if n == 0 {
        return Some(Vec::new());
    }

    let mut prefixes = Vec::with_capacity(n);
    let mut acc = F::ONE;
    for &xi in x {
        prefixes.push(acc);
        acc *= xi;
    }

    // A zero anywhere collapses the running product to zero.
    let mut suffix = acc.try_inverse()?;

    let mut result = vec![F::ZERO; n];
    for i in (0..n).rev() {
        result[i] = suffix * prefixes[i];
        suffix *= x[i];
    }
    Some(result)
}

/// In-place variant of [`try_batch_inverse`]; safe when the caller aliases
/// source and destination since the prefix pass copies the inputs out first.
pub fn try_batch_inverse_in_place<F: Field>(x: &mut [F]) -> Option<()> {
    let inverses = try_batch_inverse(x)?;
    x.copy_from_slice(&inverses);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::CubicExtension;
    use crate::goldilocks_field::GoldilocksField;

    #[test]
    fn batch_inverse_matches_inverse() {
        type F = GoldilocksField;
        let xs: Vec<F> = (1..100).map(F::from_canonical_u64).collect();
        let invs = try_batch_inverse(&xs).unwrap();
        for (x, inv) in xs.iter().zip(&invs) {
            assert_eq!(*x * *inv, F::ONE);
        }
    }

    #[test]
    fn batch_inverse_extension() {
        type E = CubicExtension<GoldilocksField>;
        let xs: Vec<E> = (0..50).map(|_| E::rand()).filter(|x| !x.is_zero()).collect();
        let invs = try_batch_inverse(&xs).unwrap();
        for (x, inv) in xs.iter().zip(&invs) {
            assert_eq!(*x * *inv, E::ONE);
        }
    }

    #[test]
    fn batch_inverse_rejects_zero() {
        type F = GoldilocksField;
        let xs = vec![F::ONE, F::ZERO, F::TWO];
        assert!(try_batch_inverse(&xs).is_none());
    }
}
