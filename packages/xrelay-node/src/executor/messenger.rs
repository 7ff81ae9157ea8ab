//! Messenger contract executor
//!
//! One relay is: `is_applied` pre-check, signed `relay_message` broadcast,
//! then polling the LCD until the tx is included or the finality timeout
//! elapses. A timed-out tx is reported as `Failed`; the pre-check on the
//! next attempt turns an eventually-included tx into `RejectedDuplicate`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use base64::Engine;
use eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use xrelay_core::{Envelope, TokenMappingSource};

use crate::executor::{classify_rejection, RelayExecutor};
use crate::lcd_client::{LcdClient, TxResult};
use crate::types::{ExecutionReceipt, RelayOutcome};

// ============================================================================
// Messenger Wire Format
// ============================================================================

/// `relay_message.message` as the messenger deserializes it
#[derive(Debug, Clone, Serialize)]
pub struct RelayedMessage {
    pub source_chain: u64,
    pub sender: String,
    pub sequence: u64,
    pub nonce: u32,
    pub topic: u32,
    /// Base64, matching cosmwasm `Binary`
    pub payload: String,
    pub consistency_level: u8,
}

impl From<&Envelope> for RelayedMessage {
    fn from(envelope: &Envelope) -> Self {
        Self {
            source_chain: envelope.source.chain_id,
            sender: envelope.message.sender.to_string(),
            sequence: envelope.message.sequence,
            nonce: envelope.message.nonce,
            topic: envelope.message.topic,
            payload: base64::engine::general_purpose::STANDARD.encode(&envelope.message.payload),
            consistency_level: envelope.message.consistency_level,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessengerExecuteMsg {
    RelayMessage { message: RelayedMessage },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessengerQueryMsg {
    IsApplied {
        source_chain: u64,
        sender: String,
        sequence: u64,
    },
    TokenMapping {
        source_chain: u64,
        remote_token: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsAppliedResponse {
    pub applied: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMappingResponse {
    pub local_token: Option<String>,
}

// ============================================================================
// Executor
// ============================================================================

pub struct MessengerExecutor {
    client: Arc<LcdClient>,
    messenger_address: String,
    finality_timeout: Duration,
    poll_interval: Duration,
}

impl MessengerExecutor {
    pub fn new(client: Arc<LcdClient>, messenger_address: String, finality_timeout: Duration) -> Self {
        Self {
            client,
            messenger_address,
            finality_timeout,
            poll_interval: Duration::from_secs(1).min(finality_timeout / 4),
        }
    }

    async fn is_applied(&self, envelope: &Envelope) -> Result<bool> {
        let key = envelope.key();
        let res: IsAppliedResponse = self
            .client
            .query_smart(
                &self.messenger_address,
                &MessengerQueryMsg::IsApplied {
                    source_chain: key.chain_id,
                    sender: key.sender.to_string(),
                    sequence: key.sequence,
                },
            )
            .await?;
        Ok(res.applied)
    }

    /// Poll until the tx is included or the finality timeout elapses
    async fn await_inclusion(&self, txhash: &str) -> Option<TxResult> {
        let deadline = Instant::now() + self.finality_timeout;
        loop {
            match self.client.get_tx(txhash).await {
                Ok(Some(result)) => return Some(result),
                Ok(None) => debug!(txhash = %txhash, "Tx not yet included"),
                Err(e) => warn!(txhash = %txhash, error = %e, "Tx lookup failed, will retry"),
            }
            if Instant::now() + self.poll_interval > deadline {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn try_relay(&self, envelope: &Envelope) -> Result<ExecutionReceipt> {
        if self.is_applied(envelope).await? {
            debug!(key = %envelope.key(), "Ledger already holds envelope, skipping broadcast");
            return Ok(ExecutionReceipt::new(RelayOutcome::RejectedDuplicate));
        }

        let msg = MessengerExecuteMsg::RelayMessage {
            message: RelayedMessage::from(envelope),
        };
        let broadcast = self
            .client
            .execute_contract(&self.messenger_address, &msg)
            .await?;

        if broadcast.code != 0 {
            return Ok(ExecutionReceipt::new(classify_rejection(&broadcast.raw_log))
                .with_tx(broadcast.txhash, None));
        }

        let Some(tx) = self.await_inclusion(&broadcast.txhash).await else {
            let reason = format!(
                "Tx {} not included within {:?}",
                broadcast.txhash, self.finality_timeout
            );
            return Ok(ExecutionReceipt::failed(reason).with_tx(broadcast.txhash, None));
        };

        let outcome = if tx.code == 0 {
            info!(
                key = %envelope.key(),
                txhash = %tx.txhash,
                height = tx.height,
                "Envelope applied on destination"
            );
            RelayOutcome::Applied
        } else {
            classify_rejection(&tx.raw_log)
        };

        Ok(ExecutionReceipt::new(outcome).with_tx(tx.txhash, Some(tx.height)))
    }
}

#[async_trait]
impl RelayExecutor for MessengerExecutor {
    async fn relay(&self, envelope: &Envelope) -> ExecutionReceipt {
        match self.try_relay(envelope).await {
            Ok(receipt) => receipt,
            Err(e) => ExecutionReceipt::failed(format!("{:#}", e)),
        }
    }
}

// ============================================================================
// Token Mapping Source
// ============================================================================

/// Reads token mappings from the messenger's registry
pub struct MessengerQuerier {
    client: Arc<LcdClient>,
    messenger_address: String,
}

impl MessengerQuerier {
    pub fn new(client: Arc<LcdClient>, messenger_address: String) -> Self {
        Self {
            client,
            messenger_address,
        }
    }
}

#[async_trait]
impl TokenMappingSource for MessengerQuerier {
    async fn fetch_mapping(
        &self,
        source_chain: u64,
        remote_token: Address,
    ) -> eyre::Result<Option<String>> {
        let res: TokenMappingResponse = self
            .client
            .query_smart(
                &self.messenger_address,
                &MessengerQueryMsg::TokenMapping {
                    source_chain,
                    remote_token: remote_token.to_string(),
                },
            )
            .await?;
        Ok(res.local_token)
    }
}
