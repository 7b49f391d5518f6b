pub mod poseidon;
pub mod poseidon_bn128;
