//! Publish Event Decoding
//!
//! The source bus emits one `LogMessagePublished` per locked-value transfer.
//! All fields are non-indexed, so the whole record lives in the log data:
//!
//! ```solidity
//! event LogMessagePublished(
//!     address sender,
//!     uint64 sequence,
//!     uint32 nonce,
//!     uint32 topic,
//!     bytes payload,
//!     uint8 consistencyLevel
//! );
//! ```
//!
//! Logs whose first topic is some other signature are skipped. A log that
//! carries the publish signature but does not decode is an error, never a skip.

use alloy::primitives::{Address, Log, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::types::{CrossChainMessage, Envelope, SourceRef};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    event LogMessagePublished(
        address sender,
        uint64 sequence,
        uint32 nonce,
        uint32 topic,
        bytes payload,
        uint8 consistencyLevel
    );
}

/// One log inside a receipt, with its block-wide index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub log_index: u64,
    pub log: Log,
}

/// Logs of a single transaction, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub logs: Vec<ReceiptLog>,
}

/// Group rpc logs into per-transaction receipts ordered by (block, log index).
///
/// Logs flagged `removed` belong to a dropped fork and are discarded.
pub fn group_into_receipts(
    logs: Vec<alloy::rpc::types::Log>,
) -> Result<Vec<SourceReceipt>, DecodeError> {
    let mut located = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed {
            warn!(tx_hash = ?log.transaction_hash, "Skipping removed log");
            continue;
        }
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField { field: "block_number" })?;
        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField { field: "transaction_hash" })?;
        let log_index = log
            .log_index
            .ok_or(DecodeError::MissingField { field: "log_index" })?;
        located.push((block_number, log_index, tx_hash, log.inner));
    }

    located.sort_by_key(|(block, index, _, _)| (*block, *index));

    let mut receipts: Vec<SourceReceipt> = Vec::new();
    for (block_number, log_index, tx_hash, log) in located {
        match receipts.last_mut() {
            Some(receipt) if receipt.tx_hash == tx_hash => {
                receipt.logs.push(ReceiptLog { log_index, log });
            }
            _ => receipts.push(SourceReceipt {
                tx_hash,
                block_number,
                logs: vec![ReceiptLog { log_index, log }],
            }),
        }
    }

    Ok(receipts)
}

/// Decodes publish logs from one bus contract into envelopes
#[derive(Debug, Clone)]
pub struct EventDecoder {
    chain_id: u64,
    bus_address: Option<Address>,
}

impl EventDecoder {
    /// Decoder that only accepts logs emitted by `bus_address`
    pub fn new(chain_id: u64, bus_address: Address) -> Self {
        Self {
            chain_id,
            bus_address: Some(bus_address),
        }
    }

    /// Decoder that accepts publish logs from any emitter
    pub fn any_emitter(chain_id: u64) -> Self {
        Self {
            chain_id,
            bus_address: None,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Decode every publish log in the receipt, preserving log order
    pub fn decode_receipt(&self, receipt: &SourceReceipt) -> Result<Vec<Envelope>, DecodeError> {
        let mut envelopes = Vec::new();

        for entry in &receipt.logs {
            let is_publish = entry.log.data.topics().first()
                == Some(&LogMessagePublished::SIGNATURE_HASH);
            if !is_publish {
                continue;
            }

            if let Some(bus) = self.bus_address {
                if entry.log.address != bus {
                    debug!(
                        tx_hash = %receipt.tx_hash,
                        emitter = %entry.log.address,
                        "Ignoring publish log from foreign emitter"
                    );
                    continue;
                }
            }

            let event = LogMessagePublished::decode_log_data(&entry.log.data, true).map_err(|e| {
                DecodeError::Malformed {
                    tx_hash: receipt.tx_hash,
                    log_index: entry.log_index,
                    reason: e.to_string(),
                }
            })?;

            envelopes.push(Envelope::new(
                CrossChainMessage {
                    sender: event.sender,
                    sequence: event.sequence,
                    nonce: event.nonce,
                    topic: event.topic,
                    payload: event.payload,
                    consistency_level: event.consistencyLevel,
                },
                SourceRef {
                    chain_id: self.chain_id,
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                    log_index: entry.log_index,
                },
            ));
        }

        Ok(envelopes)
    }
}
