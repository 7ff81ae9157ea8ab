//! Common types for cross-chain relay
//!
//! `CrossChainMessage` is the log-level record emitted by the source bus.
//! `Envelope` wraps it with the provenance the relay needs (chain, tx, block)
//! and is the unit every other component moves around.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::message_id;

// ============================================================================
// Topics
// ============================================================================

/// Wire value of the token-transfer topic
pub const TRANSFER_TOPIC: u32 = 0;

/// Application routing tag carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Transfer,
}

impl Topic {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            TRANSFER_TOPIC => Some(Topic::Transfer),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Topic::Transfer => TRANSFER_TOPIC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Messages
// ============================================================================

/// One `LogMessagePublished` record as emitted on the source chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    /// Account that originated the deposit
    pub sender: Address,
    /// Per-sender delivery counter
    pub sequence: u64,
    /// Per-contract uniqueness value, unrelated to `sequence`
    pub nonce: u32,
    /// Routing tag, see [`Topic`]
    pub topic: u32,
    /// Topic-specific bytes
    pub payload: Bytes,
    /// Source confirmations required before relay
    pub consistency_level: u8,
}

/// Where a message was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chain_id: u64,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Identity of a message across the whole relay: `(chain, sender, sequence)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub chain_id: u64,
    pub sender: Address,
    pub sequence: u64,
}

impl MessageKey {
    /// Ordering lane this message belongs to
    pub fn lane(&self) -> (u64, Address) {
        (self.chain_id, self.sender)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.sender, self.sequence)
    }
}

/// Canonical relay unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: CrossChainMessage,
    pub source: SourceRef,
}

impl Envelope {
    pub fn new(message: CrossChainMessage, source: SourceRef) -> Self {
        Self { message, source }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            chain_id: self.source.chain_id,
            sender: self.message.sender,
            sequence: self.message.sequence,
        }
    }

    /// Stable 32-byte identifier, used in logs and the status API
    pub fn id(&self) -> B256 {
        message_id(
            self.source.chain_id,
            self.message.sender,
            self.message.sequence,
        )
    }

    /// Confirmations of the emitting block given the current source head.
    ///
    /// The including block counts as the first confirmation.
    pub fn confirmations(&self, head: u64) -> u64 {
        if head < self.source.block_number {
            0
        } else {
            head - self.source.block_number + 1
        }
    }

    pub fn is_confirmed(&self, head: u64) -> bool {
        self.confirmations(head) >= u64::from(self.message.consistency_level)
    }
}

// ============================================================================
// Token Mapping
// ============================================================================

/// `(remoteToken, localToken)` pair scoped to the source chain it bridges from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMapping {
    pub source_chain: u64,
    pub remote_token: Address,
    pub local_token: String,
}
