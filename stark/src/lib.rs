//! STARK prover core for PIL2 constraint systems.
//!
//! Given a constraint-system description ([`stark_info::StarkInfo`]), the
//! compiled expression bytecode ([`expressions_bin::ExpressionsBin`]) and an
//! execution trace, [`starks::gen_proof`] produces an opening FRI proof that
//! [`verifier::stark_verify`] checks.

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod constraints;
pub mod errors;
pub mod expressions;
pub mod expressions_bin;
pub mod fri;
pub mod hash;
pub mod hints;
pub mod merkle_tree;
pub mod proof;
pub mod setup;
pub mod stark_info;
pub mod starks;
pub mod transcript;
pub mod verifier;

#[cfg(test)]
mod pipeline_tests;

pub use errors::{StarkError, StarkResult};

pub(crate) type F = estark_field::GoldilocksField;
pub(crate) type E = estark_field::CubicExtension<estark_field::GoldilocksField>;

pub use estark_field::FIELD_EXTENSION;
