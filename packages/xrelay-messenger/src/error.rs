//! Error types for the messenger contract
//!
//! Relayers classify failed transactions by these messages, so the wording of
//! the relay errors is part of the contract interface.

use cosmwasm_std::StdError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("{0}")]
    Std(#[from] StdError),

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    #[error("Unauthorized: only admin can perform this action")]
    Unauthorized,

    #[error("Unauthorized: sender is not a registered relayer")]
    UnauthorizedRelayer,

    #[error("Messenger is paused")]
    Paused,

    // ========================================================================
    // Relay Errors
    // ========================================================================

    #[error("Message already applied: chain {source_chain} sender {sender} sequence {sequence}")]
    AlreadyApplied {
        source_chain: u64,
        sender: String,
        sequence: u64,
    },

    #[error("Unroutable message: topic {topic}")]
    UnroutableMessage { topic: u32 },

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Unmapped token: {remote_token} from chain {source_chain}")]
    UnmappedToken {
        source_chain: u64,
        remote_token: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================

    #[error("Mapping conflict: {remote_token} is mapped to {existing}, requested {requested}")]
    MappingConflict {
        remote_token: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid local token: must not be empty")]
    InvalidLocalToken,

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },
}
