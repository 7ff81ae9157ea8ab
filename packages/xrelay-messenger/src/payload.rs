//! Transfer payload and address decoding
//!
//! The payload of a topic-0 message is the ABI encoding of
//! `(address asset, uint256 amount, address recipient)`: three 32-byte words.
//! Addresses are right-aligned in their word and must have a zero upper
//! 12 bytes. Amounts must fit in 128 bits.

use cosmwasm_std::Uint128;

use crate::error::ContractError;

pub const TRANSFER_TOPIC: u32 = 0;
pub const TRANSFER_PAYLOAD_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Source asset, lowercase `0x` hex
    pub asset: String,
    pub amount: Uint128,
    /// Recipient, lowercase `0x` hex
    pub recipient: String,
}

pub fn decode_transfer(payload: &[u8]) -> Result<Transfer, ContractError> {
    if payload.len() != TRANSFER_PAYLOAD_LEN {
        return Err(ContractError::InvalidPayload {
            reason: format!(
                "expected {} bytes, got {}",
                TRANSFER_PAYLOAD_LEN,
                payload.len()
            ),
        });
    }

    let asset = address_word(&payload[0..32], "asset")?;

    let amount_word = &payload[32..64];
    if amount_word[..16].iter().any(|b| *b != 0) {
        return Err(ContractError::InvalidPayload {
            reason: "amount exceeds 128 bits".to_string(),
        });
    }
    let mut amount_bytes = [0u8; 16];
    amount_bytes.copy_from_slice(&amount_word[16..32]);
    let amount = Uint128::new(u128::from_be_bytes(amount_bytes));
    if amount.is_zero() {
        return Err(ContractError::InvalidPayload {
            reason: "zero amount".to_string(),
        });
    }

    let recipient = address_word(&payload[64..96], "recipient")?;
    if recipient == format!("0x{}", "0".repeat(40)) {
        return Err(ContractError::InvalidPayload {
            reason: "zero recipient".to_string(),
        });
    }

    Ok(Transfer {
        asset,
        amount,
        recipient,
    })
}

fn address_word(word: &[u8], field: &str) -> Result<String, ContractError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ContractError::InvalidPayload {
            reason: format!("{} is not a left-padded address", field),
        });
    }
    Ok(format!("0x{}", hex::encode(&word[12..32])))
}

/// Normalize a `0x` EVM address to lowercase, rejecting anything malformed
pub fn normalize_evm_address(address: &str) -> Result<String, ContractError> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ContractError::InvalidAddress {
            reason: format!("{} is missing the 0x prefix", address),
        })?;

    if stripped.len() != 40 || hex::decode(stripped).is_err() {
        return Err(ContractError::InvalidAddress {
            reason: format!("{} is not a 20-byte hex address", address),
        });
    }

    Ok(format!("0x{}", stripped.to_ascii_lowercase()))
}
