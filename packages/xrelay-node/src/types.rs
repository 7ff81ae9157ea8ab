//! Relay-side state for envelopes in flight

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use xrelay_core::{Envelope, MessageKey};

// ============================================================================
// Envelope State Machine
// ============================================================================

/// Where an envelope sits in the relay pipeline
///
/// ```text
/// Observed -> ConfirmationsPending -> Eligible -> Submitted -> Applied
///     |                                  |  ^         |   \-> RejectedInvalid
///     v                                  v  |         |
///    Held <------------------------------'  '---------'  (transient failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Observed,
    ConfirmationsPending,
    Eligible,
    /// Blocked on configuration (unroutable topic, unmapped token)
    Held,
    Submitted,
    /// Applied on the destination, or already applied by an earlier attempt
    Applied,
    RejectedInvalid,
}

impl EnvelopeState {
    pub const ALL: [EnvelopeState; 7] = [
        EnvelopeState::Observed,
        EnvelopeState::ConfirmationsPending,
        EnvelopeState::Eligible,
        EnvelopeState::Held,
        EnvelopeState::Submitted,
        EnvelopeState::Applied,
        EnvelopeState::RejectedInvalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeState::Observed => "observed",
            EnvelopeState::ConfirmationsPending => "confirmations_pending",
            EnvelopeState::Eligible => "eligible",
            EnvelopeState::Held => "held",
            EnvelopeState::Submitted => "submitted",
            EnvelopeState::Applied => "applied",
            EnvelopeState::RejectedInvalid => "rejected_invalid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvelopeState::Applied | EnvelopeState::RejectedInvalid)
    }

    pub fn can_transition_to(&self, next: EnvelopeState) -> bool {
        use EnvelopeState::*;
        matches!(
            (self, next),
            (Observed, ConfirmationsPending)
                | (Observed, Held)
                | (ConfirmationsPending, Eligible)
                | (Eligible, Submitted)
                | (Eligible, Held)
                | (Held, Eligible)
                | (Submitted, Applied)
                | (Submitted, RejectedInvalid)
                | (Submitted, Eligible)
        )
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvelopeState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown envelope state: {}", s))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid transition {from} -> {to} for {key}")]
pub struct TransitionError {
    pub key: MessageKey,
    pub from: EnvelopeState,
    pub to: EnvelopeState,
}

/// An envelope plus its relay bookkeeping
#[derive(Debug, Clone)]
pub struct TrackedEnvelope {
    pub envelope: Envelope,
    pub state: EnvelopeState,
    /// Submission attempts made so far, across escalations
    pub attempts: u32,
    pub last_error: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedEnvelope {
    pub fn observed(envelope: Envelope) -> Self {
        Self {
            envelope,
            state: EnvelopeState::Observed,
            attempts: 0,
            last_error: None,
            dest_tx_hash: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> MessageKey {
        self.envelope.key()
    }

    pub fn transition(&mut self, next: EnvelopeState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                key: self.key(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// Execution Results
// ============================================================================

/// Result of one delivery to the destination messenger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RelayOutcome {
    Applied,
    /// The ledger already holds this (sender, sequence); counts as success
    RejectedDuplicate,
    /// The destination will never accept this envelope
    RejectedInvalid(String),
    /// Transient; safe to retry
    Failed(String),
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Applied => "applied",
            RelayOutcome::RejectedDuplicate => "rejected_duplicate",
            RelayOutcome::RejectedInvalid(_) => "rejected_invalid",
            RelayOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RelayOutcome::Applied | RelayOutcome::RejectedDuplicate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub outcome: RelayOutcome,
    /// Destination transaction hash, when a transaction was broadcast
    pub tx_hash: Option<String>,
    pub height: Option<u64>,
}

impl ExecutionReceipt {
    pub fn new(outcome: RelayOutcome) -> Self {
        Self {
            outcome,
            tx_hash: None,
            height: None,
        }
    }

    pub fn with_tx(mut self, tx_hash: impl Into<String>, height: Option<u64>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self.height = height;
        self
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(RelayOutcome::Failed(reason.into()))
    }
}

/// One submission try, kept for the status API
#[derive(Debug, Clone, Serialize)]
pub struct RelayAttempt {
    pub message_id: String,
    pub key: MessageKey,
    pub attempt: u32,
    pub outcome: RelayOutcome,
    pub tx_hash: Option<String>,
    pub at: DateTime<Utc>,
}

impl RelayAttempt {
    pub fn new(envelope: &Envelope, attempt: u32, receipt: &ExecutionReceipt) -> Self {
        Self {
            message_id: envelope.id().to_string(),
            key: envelope.key(),
            attempt,
            outcome: receipt.outcome.clone(),
            tx_hash: receipt.tx_hash.clone(),
            at: Utc::now(),
        }
    }
}
