//! Relay execution against the destination messenger
//!
//! - `messenger` - production executor over the LCD client, plus the token
//!   mapping querier backing the node's registry cache

use async_trait::async_trait;

use xrelay_core::Envelope;

use crate::types::{ExecutionReceipt, RelayOutcome};

pub mod messenger;

pub use messenger::{MessengerExecutor, MessengerQuerier};

/// Delivers one envelope to the destination.
///
/// Implementations never return an error: every failure mode is folded into
/// the receipt's [`RelayOutcome`], with transport problems reported as
/// `Failed` so the caller can retry.
#[async_trait]
pub trait RelayExecutor: Send + Sync {
    async fn relay(&self, envelope: &Envelope) -> ExecutionReceipt;
}

/// Map a destination rejection (tx raw log or contract error) to an outcome
pub fn classify_rejection(raw_log: &str) -> RelayOutcome {
    let log = raw_log.to_lowercase();

    if log.contains("already applied") {
        return RelayOutcome::RejectedDuplicate;
    }

    // The messenger will never accept these for this envelope
    if log.contains("unroutable message")
        || log.contains("invalid payload")
        || log.contains("unmapped token")
        || log.contains("mapping conflict")
        || log.contains("invalid address")
    {
        return RelayOutcome::RejectedInvalid(raw_log.to_string());
    }

    // Out of gas, sequence mismatch, paused messenger, revoked relayer, ...
    RelayOutcome::Failed(raw_log.to_string())
}
