use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use num::bigint::BigUint;
use num::{Integer, One};
use serde::{Deserialize, Serialize};

use crate::types::{Field, Sample};

/// The scalar field of the BN254 curve, used by the BN128 Merkle/transcript
/// back-end. Little-endian `u64` limbs, canonicalised lazily.
#[derive(Copy, Clone, Serialize, Deserialize)]
pub struct Bn254Field(pub [u64; 4]);

fn biguint_from_array(arr: [u64; 4]) -> BigUint {
    BigUint::from_slice(&[
        arr[0] as u32,
        (arr[0] >> 32) as u32,
        arr[1] as u32,
        (arr[1] >> 32) as u32,
        arr[2] as u32,
        (arr[2] >> 32) as u32,
        arr[3] as u32,
        (arr[3] >> 32) as u32,
    ])
}

impl Bn254Field {
    pub fn from_noncanonical_str(n: &str) -> Self {
        Self::from_noncanonical_biguint(BigUint::from_str(n).unwrap())
    }

    /// Packs little-endian `u64` limbs; values up to `2^256` are reduced.
    pub fn from_u64_array(limbs: [u64; 4]) -> Self {
        Self::from_noncanonical_biguint(biguint_from_array(limbs))
    }

    pub fn to_canonical_biguint(&self) -> BigUint {
        let mut result = biguint_from_array(self.0);
        if result >= Self::order() {
            result -= Self::order();
        }
        result
    }

    /// Canonical little-endian `u64` limbs.
    pub fn to_u64_array(&self) -> [u64; 4] {
        let digits = self.to_canonical_biguint().to_u64_digits();
        let mut limbs = [0u64; 4];
        limbs[..digits.len()].copy_from_slice(&digits);
        limbs
    }
}

impl Default for Bn254Field {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for Bn254Field {
    fn eq(&self, other: &Self) -> bool {
        self.to_canonical_biguint() == other.to_canonical_biguint()
    }
}

impl Eq for Bn254Field {}

impl Hash for Bn254Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_canonical_biguint().hash(state)
    }
}

impl Display for Bn254Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_canonical_biguint(), f)
    }
}

impl Debug for Bn254Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.to_canonical_biguint(), f)
    }
}

impl Sample for Bn254Field {
    #[inline]
    fn sample<R>(rng: &mut R) -> Self
    where
        R: rand::RngCore + ?Sized,
    {
        use num::bigint::RandBigInt;
        Self::from_noncanonical_biguint(rng.gen_biguint_below(&Self::order()))
    }
}

impl Field for Bn254Field {
    const ZERO: Self = Self([0; 4]);
    const ONE: Self = Self([1, 0, 0, 0]);
    const TWO: Self = Self([2, 0, 0, 0]);
    const NEG_ONE: Self = Self([
        4891460686036598784,
        2896914383306846353,
        13281191951274694749,
        3486998266802970665,
    ]);

    const TWO_ADICITY: usize = 28;

    const MULTIPLICATIVE_GROUP_GENERATOR: Self = Self([5, 0, 0, 0]);
    const POWER_OF_TWO_GENERATOR: Self = Self([268435456, 0, 0, 0]);

    fn order() -> BigUint {
        BigUint::from_str(
            "21888242871839275222246405745257275088548364400416034343698204186575808495617",
        )
        .unwrap()
    }

    fn try_inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }

        // Fermat's little theorem.
        let exp = Self::order() - BigUint::one() - BigUint::one();
        let result = self.to_canonical_biguint().modpow(&exp, &Self::order());
        Some(Self::from_noncanonical_biguint(result))
    }

    fn from_canonical_u64(n: u64) -> Self {
        Self([n, 0, 0, 0])
    }

    fn from_noncanonical_biguint(n: BigUint) -> Self {
        let digits = n.mod_floor(&Self::order()).to_u64_digits();
        let mut limbs = [0u64; 4];
        limbs[..digits.len()].copy_from_slice(&digits);
        Self(limbs)
    }
}

impl Neg for Bn254Field {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        if self.is_zero() {
            Self::ZERO
        } else {
            Self::from_noncanonical_biguint(Self::order() - self.to_canonical_biguint())
        }
    }
}

impl Add for Bn254Field {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        let mut result = self.to_canonical_biguint() + rhs.to_canonical_biguint();
        if result >= Self::order() {
            result -= Self::order();
        }
        Self::from_noncanonical_biguint(result)
    }
}

impl AddAssign for Bn254Field {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Bn254Field {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl Sub for Bn254Field {
    type Output = Self;

    #[inline]
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl SubAssign for Bn254Field {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for Bn254Field {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::from_noncanonical_biguint(
            (self.to_canonical_biguint() * rhs.to_canonical_biguint()).mod_floor(&Self::order()),
        )
    }
}

impl MulAssign for Bn254Field {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl Product for Bn254Field {
    #[inline]
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.reduce(|acc, x| acc * x).unwrap_or(Self::ONE)
    }
}

impl Div for Bn254Field {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self::Output {
        self * rhs.inverse()
    }
}

impl DivAssign for Bn254Field {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type F = Bn254Field;

    #[test]
    fn neg_one_is_order_minus_one() {
        assert_eq!(
            F::NEG_ONE.to_canonical_biguint(),
            F::order() - BigUint::one()
        );
        assert_eq!(F::NEG_ONE + F::ONE, F::ZERO);
    }

    #[test]
    fn inverses() {
        for _ in 0..10 {
            let x = F::rand();
            if x.is_zero() {
                continue;
            }
            assert_eq!(x * x.inverse(), F::ONE);
        }
        assert!(F::ZERO.try_inverse().is_none());
    }

    #[test]
    fn limb_round_trip() {
        let x = F::rand();
        assert_eq!(F::from_u64_array(x.to_u64_array()), x);
    }
}
