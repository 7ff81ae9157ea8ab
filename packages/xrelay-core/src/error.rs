//! Error types shared by the decoder, validator and token registry.

use alloy::primitives::{Address, B256};
use thiserror::Error;

/// A matched publish log could not be turned into a message.
///
/// Always fatal for the receipt that carried it: the watcher must stop at
/// that block range rather than skip the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed publish log in tx {tx_hash} at index {log_index}: {reason}")]
    Malformed {
        tx_hash: B256,
        log_index: u64,
        reason: String,
    },

    #[error("Log is missing {field} (pending or pruned log?)")]
    MissingField { field: &'static str },
}

/// Envelope rejected before submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Stale sequence for sender {sender}: {sequence} <= highest seen {highest}")]
    StaleSequence {
        sender: Address,
        sequence: u64,
        highest: u64,
    },

    #[error("Unroutable message: topic {topic}: {reason}")]
    UnroutableMessage { topic: u32, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unmapped token {remote_token} from chain {source_chain}")]
    UnmappedToken {
        source_chain: u64,
        remote_token: Address,
    },

    #[error(
        "Mapping conflict for {remote_token} from chain {source_chain}: \
         mapped to {existing}, requested {requested}"
    )]
    MappingConflict {
        source_chain: u64,
        remote_token: Address,
        existing: String,
        requested: String,
    },

    #[error("Token registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Configuration-level errors are held for an operator; `Unavailable` is
    /// worth retrying on the next tick.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, RegistryError::Unavailable(_))
    }
}
