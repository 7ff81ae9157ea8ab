//! Postgres-backed store tests
//!
//! Run with: cargo test --test integration_test -- --ignored --nocapture
//!
//! Prerequisites:
//! - DATABASE_URL pointing at a disposable Postgres database

use alloy::primitives::{Address, Bytes, B256, U256};
use xrelay_core::{CrossChainMessage, Envelope, SourceRef, Topic, TransferPayload};
use xrelay_node::{db, EnvelopeState, EnvelopeStore, PgStore, TrackedEnvelope};

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = db::create_pool(&url).await.expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to run migrations");
    PgStore::new(pool)
}

/// A chain id no other run has used, so rows from earlier runs don't interfere
fn fresh_chain_id() -> u64 {
    1_000_000 + (chrono::Utc::now().timestamp_micros() as u64 % 1_000_000_000)
}

fn envelope(chain_id: u64, sequence: u64) -> Envelope {
    let sender = Address::repeat_byte(0xa1);
    let payload = TransferPayload::new(Address::repeat_byte(0x0c), U256::from(100_000u64), sender);
    Envelope::new(
        CrossChainMessage {
            sender,
            sequence,
            nonce: 1,
            topic: Topic::Transfer.as_u32(),
            payload: Bytes::from(payload.to_bytes()),
            consistency_level: 2,
        },
        SourceRef {
            chain_id,
            tx_hash: B256::repeat_byte(sequence as u8),
            block_number: 42,
            log_index: 3,
        },
    )
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_envelope_lifecycle_round_trip() {
    let store = store().await;
    let chain_id = fresh_chain_id();
    let first = envelope(chain_id, 1);
    let second = envelope(chain_id, 2);

    assert!(store.insert_observed(&first).await.unwrap());
    assert!(!store.insert_observed(&first).await.unwrap());
    assert!(store.insert_observed(&second).await.unwrap());

    let mut applied = TrackedEnvelope::observed(first.clone());
    for state in [
        EnvelopeState::ConfirmationsPending,
        EnvelopeState::Eligible,
        EnvelopeState::Submitted,
        EnvelopeState::Applied,
    ] {
        applied.transition(state).unwrap();
    }
    applied.attempts = 2;
    applied.dest_tx_hash = Some("AB".repeat(32));
    store.save_state(&applied).await.unwrap();

    let mut held = TrackedEnvelope::observed(second.clone());
    held.transition(EnvelopeState::Held).unwrap();
    held.last_error = Some("Unmapped token".to_string());
    store.save_state(&held).await.unwrap();

    let unfinished: Vec<TrackedEnvelope> = store
        .load_unfinished()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.envelope.source.chain_id == chain_id)
        .collect();
    assert_eq!(unfinished.len(), 1);
    let reloaded = &unfinished[0];
    assert_eq!(reloaded.envelope, second);
    assert_eq!(reloaded.state, EnvelopeState::Held);
    assert_eq!(reloaded.last_error.as_deref(), Some("Unmapped token"));

    let watermark = store
        .watermarks()
        .await
        .unwrap()
        .into_iter()
        .find(|w| w.chain_id == chain_id)
        .expect("watermark for applied envelope");
    assert_eq!(watermark.sequence, 1);
    assert_eq!(watermark.sender, Address::repeat_byte(0xa1));
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_source_cursor_round_trip() {
    let store = store().await;
    let chain_id = fresh_chain_id();

    assert_eq!(store.last_block(chain_id).await.unwrap(), None);
    store.set_last_block(chain_id, 100).await.unwrap();
    store.set_last_block(chain_id, 250).await.unwrap();
    assert_eq!(store.last_block(chain_id).await.unwrap(), Some(250));
}
