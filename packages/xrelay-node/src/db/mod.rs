use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Insert a newly observed envelope.
///
/// Returns false when `(source_chain_id, sender, sequence)` is already stored,
/// which is what a re-scan after a crash produces.
pub async fn insert_envelope(pool: &PgPool, envelope: &NewEnvelope) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO envelopes (source_chain_id, sender, sequence, nonce, topic, payload,
            consistency_level, tx_hash, block_number, log_index)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (source_chain_id, sender, sequence) DO NOTHING
        "#,
    )
    .bind(envelope.source_chain_id)
    .bind(&envelope.sender)
    .bind(envelope.sequence)
    .bind(envelope.nonce)
    .bind(envelope.topic)
    .bind(&envelope.payload)
    .bind(envelope.consistency_level)
    .bind(&envelope.tx_hash)
    .bind(envelope.block_number)
    .bind(envelope.log_index)
    .execute(pool)
    .await
    .wrap_err("Failed to insert envelope")?;

    Ok(result.rows_affected() == 1)
}

/// Persist the relay bookkeeping of one envelope
#[allow(clippy::too_many_arguments)]
pub async fn update_envelope_state(
    pool: &PgPool,
    source_chain_id: i64,
    sender: &str,
    sequence: i64,
    state: &str,
    attempts: i32,
    last_error: Option<&str>,
    dest_tx_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE envelopes
        SET state = $4, attempts = $5, last_error = $6, dest_tx_hash = $7, updated_at = NOW()
        WHERE source_chain_id = $1 AND sender = $2 AND sequence = $3
        "#,
    )
    .bind(source_chain_id)
    .bind(sender)
    .bind(sequence)
    .bind(state)
    .bind(attempts)
    .bind(last_error)
    .bind(dest_tx_hash)
    .execute(pool)
    .await
    .wrap_err_with(|| {
        format!(
            "Failed to update envelope {}:{}:{} to {}",
            source_chain_id, sender, sequence, state
        )
    })?;

    Ok(())
}

/// Every envelope that has not reached a terminal state, in lane order
pub async fn get_unfinished_envelopes(pool: &PgPool) -> Result<Vec<EnvelopeRow>> {
    let rows = sqlx::query_as::<_, EnvelopeRow>(
        r#"SELECT id, source_chain_id, sender, sequence, nonce, topic, payload, consistency_level,
                  tx_hash, block_number, log_index, state, attempts, last_error, dest_tx_hash,
                  created_at, updated_at
           FROM envelopes
           WHERE state NOT IN ('applied', 'rejected_invalid')
           ORDER BY source_chain_id, sender, sequence"#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| {
        error!("SQL error getting unfinished envelopes: {:?}", e);
        e
    })
    .wrap_err("Failed to get unfinished envelopes")?;

    Ok(rows)
}

/// Highest terminal sequence per lane
pub async fn get_watermarks(pool: &PgPool) -> Result<Vec<WatermarkRow>> {
    let rows = sqlx::query_as::<_, WatermarkRow>(
        r#"SELECT source_chain_id, sender, MAX(sequence) AS sequence
           FROM envelopes
           WHERE state IN ('applied', 'rejected_invalid')
           GROUP BY source_chain_id, sender"#,
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to get lane watermarks")?;

    Ok(rows)
}

/// Envelope counts grouped by state
pub async fn count_envelopes_by_state(pool: &PgPool) -> Result<Vec<StateCountRow>> {
    let rows = sqlx::query_as::<_, StateCountRow>(
        r#"SELECT state, COUNT(*) AS count FROM envelopes GROUP BY state"#,
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to count envelopes by state")?;

    Ok(rows)
}

/// Get last processed block of a source chain
pub async fn get_last_block(pool: &PgPool, chain_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as(r#"SELECT last_processed_block FROM source_cursors WHERE chain_id = $1"#)
            .bind(chain_id)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to get last processed block")?;

    Ok(row.map(|r| r.0))
}

/// Update last processed block of a source chain
pub async fn update_last_block(pool: &PgPool, chain_id: i64, block_number: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO source_cursors (chain_id, last_processed_block)
        VALUES ($1, $2)
        ON CONFLICT (chain_id) DO UPDATE SET last_processed_block = $2, updated_at = NOW()
        "#,
    )
    .bind(chain_id)
    .bind(block_number)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update last block for chain {}", chain_id))?;

    Ok(())
}
