use alloy::primitives::{Address, Bytes, B256};
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use sqlx::FromRow;
use std::str::FromStr;

use xrelay_core::{CrossChainMessage, Envelope, SourceRef};

use crate::types::{EnvelopeState, TrackedEnvelope};

// Postgres has no unsigned integers. u64 chain ids, sequences and block
// numbers are stored as BIGINT and converted with try_from on both sides.

/// Row of the `envelopes` table
#[derive(Debug, Clone, FromRow)]
pub struct EnvelopeRow {
    pub id: i64,
    pub source_chain_id: i64,
    pub sender: String,
    pub sequence: i64,
    pub nonce: i64,
    pub topic: i64,
    pub payload: Vec<u8>,
    pub consistency_level: i16,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub state: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EnvelopeRow> for TrackedEnvelope {
    type Error = eyre::Report;

    fn try_from(row: EnvelopeRow) -> Result<Self> {
        let sender = Address::from_str(&row.sender)
            .map_err(|e| eyre!("Invalid sender in envelope {}: {}", row.id, e))?;
        let tx_hash = B256::from_str(&row.tx_hash)
            .map_err(|e| eyre!("Invalid tx hash in envelope {}: {}", row.id, e))?;
        let state = EnvelopeState::from_str(&row.state).map_err(|e| eyre!(e))?;

        let envelope = Envelope::new(
            CrossChainMessage {
                sender,
                sequence: u64::try_from(row.sequence)?,
                nonce: u32::try_from(row.nonce)?,
                topic: u32::try_from(row.topic)?,
                payload: Bytes::from(row.payload),
                consistency_level: u8::try_from(row.consistency_level)?,
            },
            SourceRef {
                chain_id: u64::try_from(row.source_chain_id)?,
                tx_hash,
                block_number: u64::try_from(row.block_number)?,
                log_index: u64::try_from(row.log_index)?,
            },
        );

        Ok(TrackedEnvelope {
            envelope,
            state,
            attempts: u32::try_from(row.attempts)?,
            last_error: row.last_error,
            dest_tx_hash: row.dest_tx_hash,
            updated_at: row.updated_at,
        })
    }
}

/// For inserting newly observed envelopes
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub source_chain_id: i64,
    pub sender: String,
    pub sequence: i64,
    pub nonce: i64,
    pub topic: i64,
    pub payload: Vec<u8>,
    pub consistency_level: i16,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
}

impl TryFrom<&Envelope> for NewEnvelope {
    type Error = eyre::Report;

    fn try_from(envelope: &Envelope) -> Result<Self> {
        Ok(Self {
            source_chain_id: i64::try_from(envelope.source.chain_id)?,
            sender: envelope.message.sender.to_string(),
            sequence: i64::try_from(envelope.message.sequence)?,
            nonce: i64::from(envelope.message.nonce),
            topic: i64::from(envelope.message.topic),
            payload: envelope.message.payload.to_vec(),
            consistency_level: i16::from(envelope.message.consistency_level),
            tx_hash: envelope.source.tx_hash.to_string(),
            block_number: i64::try_from(envelope.source.block_number)?,
            log_index: i64::try_from(envelope.source.log_index)?,
        })
    }
}

/// Highest terminal sequence of one lane
#[derive(Debug, Clone, FromRow)]
pub struct WatermarkRow {
    pub source_chain_id: i64,
    pub sender: String,
    pub sequence: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct StateCountRow {
    pub state: String,
    pub count: i64,
}
