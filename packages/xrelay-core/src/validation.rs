//! Envelope validation
//!
//! A fast-fail check run by the relay before anything is submitted. It is
//! advisory only: the destination messenger re-validates every message, and
//! its ledger is the authority on duplicates.
//!
//! Two checks are made:
//! - the sequence must be above the highest one already seen for the lane
//! - some registered [`TopicHandler`] must accept the topic and payload

use alloy::primitives::Address;
use std::collections::HashMap;

use crate::error::ValidationError;
use crate::payload::TransferPayload;
use crate::types::{Envelope, TRANSFER_TOPIC};

/// Downstream consumer of one topic
pub trait TopicHandler: Send + Sync {
    fn topic(&self) -> u32;

    fn name(&self) -> &'static str;

    /// Reject payloads this handler could not route
    fn check(&self, payload: &[u8]) -> Result<(), String>;
}

/// Handler for topic 0 token transfers
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferHandler;

impl TopicHandler for TransferHandler {
    fn topic(&self) -> u32 {
        TRANSFER_TOPIC
    }

    fn name(&self) -> &'static str {
        "transfer"
    }

    fn check(&self, payload: &[u8]) -> Result<(), String> {
        let transfer = TransferPayload::from_bytes(payload)?;
        if transfer.amount.is_zero() {
            return Err("zero amount".to_string());
        }
        if transfer.amount_u128().is_none() {
            return Err("amount exceeds 128 bits".to_string());
        }
        if transfer.recipient == Address::ZERO {
            return Err("zero recipient".to_string());
        }
        Ok(())
    }
}

pub struct EnvelopeValidator {
    handlers: HashMap<u32, Box<dyn TopicHandler>>,
    highest_seen: HashMap<(u64, Address), u64>,
}

impl Default for EnvelopeValidator {
    fn default() -> Self {
        let mut validator = Self::new();
        validator.register_handler(Box::new(TransferHandler));
        validator
    }
}

impl EnvelopeValidator {
    /// Validator with no handlers; every topic is unroutable until one is registered
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            highest_seen: HashMap::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Box<dyn TopicHandler>) {
        self.handlers.insert(handler.topic(), handler);
    }

    /// Seed the lane watermark, e.g. from persisted state on restart
    pub fn seed(&mut self, chain_id: u64, sender: Address, sequence: u64) {
        let entry = self.highest_seen.entry((chain_id, sender)).or_insert(sequence);
        *entry = (*entry).max(sequence);
    }

    pub fn highest_seen(&self, chain_id: u64, sender: Address) -> Option<u64> {
        self.highest_seen.get(&(chain_id, sender)).copied()
    }

    /// Check an envelope without recording it
    pub fn validate(&self, envelope: &Envelope) -> Result<(), ValidationError> {
        self.check_sequence(envelope)?;
        self.check_route(envelope)
    }

    /// Validate and record the envelope as seen.
    ///
    /// An unroutable envelope still counts as seen: it occupies its sequence
    /// slot even though nothing downstream can handle it.
    pub fn admit(&mut self, envelope: &Envelope) -> Result<(), ValidationError> {
        self.check_sequence(envelope)?;
        let key = envelope.key();
        self.seed(key.chain_id, key.sender, key.sequence);
        self.check_route(envelope)
    }

    fn check_sequence(&self, envelope: &Envelope) -> Result<(), ValidationError> {
        let key = envelope.key();
        match self.highest_seen(key.chain_id, key.sender) {
            Some(highest) if key.sequence <= highest => Err(ValidationError::StaleSequence {
                sender: key.sender,
                sequence: key.sequence,
                highest,
            }),
            _ => Ok(()),
        }
    }

    /// Topic and payload check alone, for envelopes whose sequence is already recorded
    pub fn check_route(&self, envelope: &Envelope) -> Result<(), ValidationError> {
        let topic = envelope.message.topic;
        let handler = self
            .handlers
            .get(&topic)
            .ok_or_else(|| ValidationError::UnroutableMessage {
                topic,
                reason: "no handler registered".to_string(),
            })?;

        handler
            .check(&envelope.message.payload)
            .map_err(|reason| ValidationError::UnroutableMessage {
                topic,
                reason: format!("{}: {}", handler.name(), reason),
            })
    }
}
