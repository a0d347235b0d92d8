//! `u256` values in Cairo calldata.
//!
//! Cairo passes a `u256` as two field elements, the low 128 bits first.

use alloy_core::primitives::U256;

use crate::Felt;

/// Split a `u256` into its calldata representation: `[low, high]`.
pub fn split_u256(value: U256) -> [Felt; 2] {
    let low: u128 = (value & U256::from(u128::MAX)).to();
    let high: u128 = (value >> 128usize).to();
    [Felt::from(low), Felt::from(high)]
}

/// Rebuild a `u256` from its `[low, high]` calldata representation.
///
/// Bits of `low` above 128 overlap with `high`, as they would on-chain.
pub fn join_u256(low: Felt, high: Felt) -> U256 {
    to_u256(low) | (to_u256(high) << 128usize)
}

fn to_u256(felt: Felt) -> U256 {
    U256::from_be_bytes(felt.to_bytes_be())
}
