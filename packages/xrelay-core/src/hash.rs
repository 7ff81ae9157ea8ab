//! Message identifiers
//!
//! A message id is the keccak256 of the packed `(chainId, sender, sequence)`
//! triple, the same key the destination ledger uses:
//!
//! ```solidity
//! keccak256(abi.encodePacked(uint64 chainId, address sender, uint64 sequence))
//! ```

use alloy::primitives::{keccak256, Address, B256};

/// Compute the 32-byte id of a message
pub fn message_id(chain_id: u64, sender: Address, sequence: u64) -> B256 {
    // abi.encodePacked layout: 8 + 20 + 8 = 36 bytes
    let mut data = [0u8; 36];
    data[0..8].copy_from_slice(&chain_id.to_be_bytes());
    data[8..28].copy_from_slice(sender.as_slice());
    data[28..36].copy_from_slice(&sequence.to_be_bytes());
    keccak256(data)
}
