#![allow(clippy::needless_range_loop)]

pub mod bn254;
pub mod extension;
pub mod fft;
pub mod goldilocks_field;
pub mod types;

pub use extension::CubicExtension;
pub use goldilocks_field::GoldilocksField;

/// The degree of the extension field used for challenges and FRI.
pub const FIELD_EXTENSION: usize = 3;
