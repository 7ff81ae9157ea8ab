//! Token-transfer payload (topic 0)
//!
//! ABI layout, all static, 96 bytes:
//!
//! | offset | field                 |
//! |--------|-----------------------|
//! | 0      | `address asset`       |
//! | 32     | `uint256 amount`      |
//! | 64     | `address recipient`   |

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolValue;

pub const TRANSFER_PAYLOAD_LEN: usize = 96;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct TransferPayload {
        address asset;
        uint256 amount;
        address recipient;
    }
}

impl TransferPayload {
    pub fn new(asset: Address, amount: U256, recipient: Address) -> Self {
        Self {
            asset,
            amount,
            recipient,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        <Self as SolValue>::abi_encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != TRANSFER_PAYLOAD_LEN {
            return Err(format!(
                "transfer payload must be {} bytes, got {}",
                TRANSFER_PAYLOAD_LEN,
                bytes.len()
            ));
        }
        <Self as SolValue>::abi_decode(bytes, true).map_err(|e| e.to_string())
    }

    /// Amount as the destination ledger stores it, `None` above 128 bits
    pub fn amount_u128(&self) -> Option<u128> {
        u128::try_from(self.amount).ok()
    }
}
