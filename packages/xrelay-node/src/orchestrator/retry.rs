//! Bounded retry around a single relay
//!
//! `Failed` outcomes are retried with exponential backoff. Once the retry
//! budget is spent the caller escalates; nothing here gives up on an envelope.

use std::time::Duration;
use tracing::{debug, warn};

use xrelay_core::Envelope;

use crate::executor::RelayExecutor;
use crate::metrics;
use crate::orchestrator::attempts::AttemptLog;
use crate::types::{ExecutionReceipt, RelayAttempt, RelayOutcome};

/// Relay retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given retry (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on retries already made
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// How a relay with retries ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResolution {
    /// Applied by this call, or earlier (`duplicate`)
    Applied {
        receipt: ExecutionReceipt,
        duplicate: bool,
    },
    RejectedInvalid {
        reason: String,
        tx_hash: Option<String>,
    },
    /// Every attempt failed transiently
    Exhausted { last_error: String },
}

/// Relay an envelope, retrying transient failures.
///
/// `prior_attempts` numbers the attempts recorded in the log so they keep
/// counting across escalations. Returns the resolution and the number of
/// attempts this call made.
pub async fn relay_with_retry(
    executor: &dyn RelayExecutor,
    envelope: &Envelope,
    config: &RetryConfig,
    log: &AttemptLog,
    prior_attempts: u32,
) -> (RelayResolution, u32) {
    let key = envelope.key();
    let mut made = 0u32;

    loop {
        let receipt = executor.relay(envelope).await;
        made += 1;
        metrics::record_attempt(&receipt.outcome);
        log.record(RelayAttempt::new(envelope, prior_attempts + made, &receipt));

        match receipt.outcome.clone() {
            RelayOutcome::Applied => {
                return (
                    RelayResolution::Applied {
                        receipt,
                        duplicate: false,
                    },
                    made,
                )
            }
            RelayOutcome::RejectedDuplicate => {
                debug!(key = %key, "Destination reports envelope already applied");
                return (
                    RelayResolution::Applied {
                        receipt,
                        duplicate: true,
                    },
                    made,
                );
            }
            RelayOutcome::RejectedInvalid(reason) => {
                return (
                    RelayResolution::RejectedInvalid {
                        reason,
                        tx_hash: receipt.tx_hash,
                    },
                    made,
                )
            }
            RelayOutcome::Failed(error) => {
                let retries = made - 1;
                if !config.should_retry(retries) {
                    return (
                        RelayResolution::Exhausted { last_error: error },
                        made,
                    );
                }
                let backoff = config.backoff_for_attempt(retries);
                warn!(
                    key = %key,
                    attempt = prior_attempts + made,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Relay attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
