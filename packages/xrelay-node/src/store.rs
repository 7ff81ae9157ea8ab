//! Envelope persistence
//!
//! The orchestrator and watchers only see [`EnvelopeStore`]. `PgStore` is the
//! production backend; `MemoryStore` serves tests and runs without a database.

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Result};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tokio::sync::Mutex;

use xrelay_core::{Envelope, MessageKey};

use crate::db;
use crate::types::{EnvelopeState, TrackedEnvelope};

/// Highest terminal sequence of a `(chain, sender)` lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub chain_id: u64,
    pub sender: Address,
    pub sequence: u64,
}

#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Store a newly observed envelope. Returns false if its key is already known.
    async fn insert_observed(&self, envelope: &Envelope) -> Result<bool>;

    async fn save_state(&self, tracked: &TrackedEnvelope) -> Result<()>;

    /// Every envelope not yet in a terminal state, ordered by key
    async fn load_unfinished(&self) -> Result<Vec<TrackedEnvelope>>;

    async fn watermarks(&self) -> Result<Vec<Watermark>>;

    async fn count_by_state(&self) -> Result<Vec<(EnvelopeState, u64)>>;

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>>;

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<()>;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EnvelopeStore for PgStore {
    async fn insert_observed(&self, envelope: &Envelope) -> Result<bool> {
        let row = db::NewEnvelope::try_from(envelope)?;
        db::insert_envelope(&self.pool, &row).await
    }

    async fn save_state(&self, tracked: &TrackedEnvelope) -> Result<()> {
        let key = tracked.key();
        db::update_envelope_state(
            &self.pool,
            i64::try_from(key.chain_id)?,
            &key.sender.to_string(),
            i64::try_from(key.sequence)?,
            tracked.state.as_str(),
            i32::try_from(tracked.attempts)?,
            tracked.last_error.as_deref(),
            tracked.dest_tx_hash.as_deref(),
        )
        .await
    }

    async fn load_unfinished(&self) -> Result<Vec<TrackedEnvelope>> {
        db::get_unfinished_envelopes(&self.pool)
            .await?
            .into_iter()
            .map(TrackedEnvelope::try_from)
            .collect()
    }

    async fn watermarks(&self) -> Result<Vec<Watermark>> {
        db::get_watermarks(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(Watermark {
                    chain_id: u64::try_from(row.source_chain_id)?,
                    sender: Address::from_str(&row.sender)
                        .map_err(|e| eyre!("Invalid sender {}: {}", row.sender, e))?,
                    sequence: u64::try_from(row.sequence)?,
                })
            })
            .collect()
    }

    async fn count_by_state(&self) -> Result<Vec<(EnvelopeState, u64)>> {
        db::count_envelopes_by_state(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                let state = EnvelopeState::from_str(&row.state).map_err(|e| eyre!(e))?;
                Ok((state, u64::try_from(row.count)?))
            })
            .collect()
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>> {
        db::get_last_block(&self.pool, i64::try_from(chain_id)?)
            .await?
            .map(|block| u64::try_from(block).map_err(Into::into))
            .transpose()
    }

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<()> {
        db::update_last_block(&self.pool, i64::try_from(chain_id)?, i64::try_from(block)?).await
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    envelopes: BTreeMap<MessageKey, TrackedEnvelope>,
    cursors: HashMap<u64, u64>,
}

/// Non-durable store; state is lost on restart
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &MessageKey) -> Option<TrackedEnvelope> {
        self.inner.lock().await.envelopes.get(key).cloned()
    }

    pub async fn all(&self) -> Vec<TrackedEnvelope> {
        self.inner.lock().await.envelopes.values().cloned().collect()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryStore {
    async fn insert_observed(&self, envelope: &Envelope) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = envelope.key();
        if inner.envelopes.contains_key(&key) {
            return Ok(false);
        }
        inner
            .envelopes
            .insert(key, TrackedEnvelope::observed(envelope.clone()));
        Ok(true)
    }

    async fn save_state(&self, tracked: &TrackedEnvelope) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .envelopes
            .get_mut(&tracked.key())
            .ok_or_else(|| eyre!("Envelope {} was never inserted", tracked.key()))?;
        *stored = tracked.clone();
        Ok(())
    }

    async fn load_unfinished(&self) -> Result<Vec<TrackedEnvelope>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .envelopes
            .values()
            .filter(|t| !t.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn watermarks(&self) -> Result<Vec<Watermark>> {
        let inner = self.inner.lock().await;
        let mut highest: BTreeMap<(u64, Address), u64> = BTreeMap::new();
        for tracked in inner.envelopes.values().filter(|t| t.state.is_terminal()) {
            let key = tracked.key();
            let entry = highest.entry(key.lane()).or_insert(key.sequence);
            *entry = (*entry).max(key.sequence);
        }
        Ok(highest
            .into_iter()
            .map(|((chain_id, sender), sequence)| Watermark {
                chain_id,
                sender,
                sequence,
            })
            .collect())
    }

    async fn count_by_state(&self) -> Result<Vec<(EnvelopeState, u64)>> {
        let inner = self.inner.lock().await;
        let mut counts: BTreeMap<EnvelopeState, u64> = BTreeMap::new();
        for tracked in inner.envelopes.values() {
            *counts.entry(tracked.state).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn last_block(&self, chain_id: u64) -> Result<Option<u64>> {
        Ok(self.inner.lock().await.cursors.get(&chain_id).copied())
    }

    async fn set_last_block(&self, chain_id: u64, block: u64) -> Result<()> {
        self.inner.lock().await.cursors.insert(chain_id, block);
        Ok(())
    }
}
