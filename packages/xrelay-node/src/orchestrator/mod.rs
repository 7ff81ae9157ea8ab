//! Bridge orchestrator
//!
//! Drives every observed envelope through
//! `Observed -> ConfirmationsPending -> Eligible -> Submitted -> {Applied | RejectedInvalid}`.
//!
//! Envelopes are grouped into lanes keyed by `(chain_id, sender)`. Within a
//! lane only the lowest pending sequence may be submitted, and only once
//! nothing is in flight, so sequence N+1 never reaches the destination
//! before N is terminal. Lanes are independent of each other and submit
//! concurrently, bounded by `max_in_flight`.
//!
//! - `retry` - bounded retry with backoff around one relay
//! - `attempts` - ring of recent attempts served by the status API

use alloy::primitives::Address;
use chrono::Utc;
use eyre::{eyre, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use xrelay_core::{
    CachedTokenRegistry, Envelope, EnvelopeValidator, MessageKey, Topic, TransferPayload,
    ValidationError,
};

use crate::executor::RelayExecutor;
use crate::metrics;
use crate::store::EnvelopeStore;
use crate::types::{EnvelopeState, TrackedEnvelope};
use crate::watchers::WatcherEvent;

pub mod attempts;
pub mod retry;

pub use attempts::AttemptLog;
pub use retry::{relay_with_retry, RelayResolution, RetryConfig};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryConfig,
    /// Circuit-breaker pause applied to a lane after its retries are exhausted
    pub lane_pause: Duration,
    pub max_in_flight: usize,
    pub tick_interval: Duration,
    /// Alarm threshold for envelopes waiting on confirmations
    pub confirmation_timeout: Duration,
    pub attempt_log_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lane_pause: Duration::from_secs(300),
            max_in_flight: 16,
            tick_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(1800),
            attempt_log_capacity: 256,
        }
    }
}

/// Per-sender ordering lane
#[derive(Debug, Default)]
struct Lane {
    /// Non-terminal envelopes by sequence
    pending: BTreeMap<u64, TrackedEnvelope>,
    /// Highest terminal sequence
    watermark: Option<u64>,
    in_flight: bool,
    paused_until: Option<Instant>,
}

impl Lane {
    fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }

    fn raise_watermark(&mut self, sequence: u64) {
        self.watermark = Some(self.watermark.map_or(sequence, |w| w.max(sequence)));
    }

    fn head_mut(&mut self) -> Option<&mut TrackedEnvelope> {
        self.pending.values_mut().next()
    }
}

/// What a submission task hands back
#[derive(Debug)]
pub struct SubmissionResult {
    tracked: TrackedEnvelope,
    /// Err when the relay task itself died
    result: std::result::Result<(RelayResolution, u32), String>,
}

/// Aborts the relay task when its submission task is aborted
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Whether the destination can route an envelope's asset right now
enum Readiness {
    Ready,
    /// Configuration-level problem; the lane waits for an operator
    Hold(String),
    /// Lookup could not be made; try again next tick
    Wait(String),
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn EnvelopeStore>,
    executor: Arc<dyn RelayExecutor>,
    registry: Arc<CachedTokenRegistry>,
    validator: EnvelopeValidator,
    lanes: BTreeMap<(u64, Address), Lane>,
    heads: HashMap<u64, u64>,
    tasks: JoinSet<SubmissionResult>,
    attempts: Arc<AttemptLog>,
    /// Envelopes already reported for a slow confirmation wait
    alarmed: HashSet<MessageKey>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn EnvelopeStore>,
        executor: Arc<dyn RelayExecutor>,
        registry: Arc<CachedTokenRegistry>,
    ) -> Self {
        let attempts = Arc::new(AttemptLog::new(config.attempt_log_capacity));
        Self {
            config,
            store,
            executor,
            registry,
            validator: EnvelopeValidator::default(),
            lanes: BTreeMap::new(),
            heads: HashMap::new(),
            tasks: JoinSet::new(),
            attempts,
            alarmed: HashSet::new(),
        }
    }

    /// Replace the default topic handlers
    pub fn with_validator(mut self, validator: EnvelopeValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn attempt_log(&self) -> Arc<AttemptLog> {
        self.attempts.clone()
    }

    /// State of a non-terminal envelope; terminal ones live only in the store
    pub fn state_of(&self, key: &MessageKey) -> Option<EnvelopeState> {
        self.lanes
            .get(&key.lane())
            .and_then(|lane| lane.pending.get(&key.sequence))
            .map(|tracked| tracked.state)
    }

    pub fn watermark(&self, chain_id: u64, sender: Address) -> Option<u64> {
        self.lanes
            .get(&(chain_id, sender))
            .and_then(|lane| lane.watermark)
    }

    pub fn is_lane_paused(&self, chain_id: u64, sender: Address) -> bool {
        self.lanes
            .get(&(chain_id, sender))
            .is_some_and(|lane| lane.is_paused(Instant::now()))
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    // ========================================================================
    // Resumption
    // ========================================================================

    /// Rebuild lanes from the store. Returns the number of unfinished envelopes.
    ///
    /// `Submitted` envelopes come back as `Eligible`: their outcome is unknown,
    /// and the executor's ledger pre-check turns an applied one into a duplicate.
    pub async fn resume(&mut self) -> Result<usize> {
        for mark in self.store.watermarks().await? {
            self.validator
                .seed(mark.chain_id, mark.sender, mark.sequence);
            self.lanes
                .entry((mark.chain_id, mark.sender))
                .or_default()
                .raise_watermark(mark.sequence);
        }

        let unfinished = self.store.load_unfinished().await?;
        let count = unfinished.len();

        for mut tracked in unfinished {
            let key = tracked.key();
            self.validator.seed(key.chain_id, key.sender, key.sequence);

            match tracked.state {
                EnvelopeState::Submitted => {
                    let last_error = tracked.last_error.clone();
                    persist(
                        self.store.as_ref(),
                        &mut tracked,
                        EnvelopeState::Eligible,
                        last_error,
                    )
                    .await?;
                }
                EnvelopeState::Observed => {
                    let (next, reason) = route_state(&self.validator, &tracked.envelope);
                    persist(self.store.as_ref(), &mut tracked, next, reason).await?;
                }
                _ => {}
            }

            self.lanes
                .entry(key.lane())
                .or_default()
                .pending
                .insert(key.sequence, tracked);
        }

        info!(
            lanes = self.lanes.len(),
            unfinished = count,
            "Resumed relay state from store"
        );
        self.refresh_gauges();
        Ok(count)
    }

    // ========================================================================
    // Watcher Events
    // ========================================================================

    pub async fn handle_event(&mut self, event: WatcherEvent) -> Result<()> {
        match event {
            WatcherEvent::Observed(envelope) => self.observe(envelope).await,
            WatcherEvent::Head { chain_id, block } => {
                let head = self.heads.entry(chain_id).or_insert(block);
                *head = (*head).max(block);
                Ok(())
            }
        }
    }

    async fn observe(&mut self, envelope: Envelope) -> Result<()> {
        let key = envelope.key();
        let lane = self.lanes.entry(key.lane()).or_default();

        // At or below the watermark is terminal and never re-derived
        if lane.watermark.is_some_and(|w| key.sequence <= w)
            || lane.pending.contains_key(&key.sequence)
        {
            debug!(key = %key, "Envelope already tracked, ignoring");
            return Ok(());
        }

        let (next, reason) = match self.validator.admit(&envelope) {
            Ok(()) => (EnvelopeState::ConfirmationsPending, None),
            Err(e @ ValidationError::StaleSequence { .. }) => {
                warn!(key = %key, error = %e, "Ignoring envelope below sender's highest sequence");
                return Ok(());
            }
            Err(e @ ValidationError::UnroutableMessage { .. }) => {
                error!(key = %key, error = %e, "Unroutable envelope, holding lane");
                (EnvelopeState::Held, Some(e.to_string()))
            }
        };

        // Tracked before the store write so a failed write still blocks the
        // sequences behind it; `retry_observed` repeats it on the next tick
        let tracked = lane
            .pending
            .entry(key.sequence)
            .or_insert_with(|| TrackedEnvelope::observed(envelope));
        record_observed(self.store.as_ref(), tracked, next, reason).await?;

        info!(
            key = %key,
            state = %tracked.state,
            block = tracked.envelope.source.block_number,
            consistency_level = tracked.envelope.message.consistency_level,
            "Tracking envelope"
        );
        Ok(())
    }

    // ========================================================================
    // State Machine
    // ========================================================================

    /// Promote confirmed envelopes, release held ones and start submissions
    pub async fn advance(&mut self) {
        let now = Instant::now();
        let lane_keys: Vec<(u64, Address)> = self.lanes.keys().copied().collect();

        for lane_key in lane_keys {
            if let Err(e) = self.advance_lane(lane_key, now).await {
                error!(
                    chain_id = lane_key.0,
                    sender = %lane_key.1,
                    error = %e,
                    "Failed to advance lane"
                );
                metrics::record_error("orchestrator");
            }
        }

        self.lanes
            .retain(|_, lane| lane.in_flight || lane.watermark.is_some() || !lane.pending.is_empty());
        self.refresh_gauges();
    }

    async fn advance_lane(&mut self, lane_key: (u64, Address), now: Instant) -> Result<()> {
        self.retry_observed(lane_key).await?;
        self.promote_confirmed(lane_key).await?;
        self.release_held(lane_key).await?;
        if self.tasks.len() < self.config.max_in_flight {
            self.submit_head(lane_key, now).await?;
        }
        Ok(())
    }

    /// Re-record envelopes whose first store write failed
    async fn retry_observed(&mut self, lane_key: (u64, Address)) -> Result<()> {
        let Some(lane) = self.lanes.get_mut(&lane_key) else {
            return Ok(());
        };

        for tracked in lane.pending.values_mut() {
            if tracked.state != EnvelopeState::Observed {
                continue;
            }
            let (next, reason) = route_state(&self.validator, &tracked.envelope);
            record_observed(self.store.as_ref(), tracked, next, reason).await?;
            info!(key = %tracked.key(), state = %tracked.state, "Recorded envelope after store retry");
        }
        Ok(())
    }

    async fn promote_confirmed(&mut self, lane_key: (u64, Address)) -> Result<()> {
        let head = self.heads.get(&lane_key.0).copied();
        let Some(lane) = self.lanes.get_mut(&lane_key) else {
            return Ok(());
        };

        for tracked in lane.pending.values_mut() {
            if tracked.state != EnvelopeState::ConfirmationsPending {
                continue;
            }

            let key = tracked.key();
            if head.is_some_and(|h| tracked.envelope.is_confirmed(h)) {
                persist(self.store.as_ref(), tracked, EnvelopeState::Eligible, None).await?;
                self.alarmed.remove(&key);
                debug!(key = %key, "Envelope confirmed");
                continue;
            }

            let waited = Utc::now()
                .signed_duration_since(tracked.updated_at)
                .to_std()
                .unwrap_or_default();
            if waited > self.config.confirmation_timeout && self.alarmed.insert(key) {
                error!(
                    key = %key,
                    confirmations = head.map(|h| tracked.envelope.confirmations(h)),
                    required = tracked.envelope.message.consistency_level,
                    waited_secs = waited.as_secs(),
                    "Confirmation wait exceeded timeout"
                );
                metrics::record_confirmation_timeout(key.chain_id);
            }
        }
        Ok(())
    }

    /// A held lane head becomes eligible once its token mapping appears
    async fn release_held(&mut self, lane_key: (u64, Address)) -> Result<()> {
        let Some(tracked) = self.lanes.get_mut(&lane_key).and_then(Lane::head_mut) else {
            return Ok(());
        };
        if tracked.state != EnvelopeState::Held {
            return Ok(());
        }
        // Topic handlers are fixed at startup; an unroutable head stays held
        if self.validator.check_route(&tracked.envelope).is_err() {
            return Ok(());
        }

        match token_readiness(&self.registry, &tracked.envelope).await {
            Readiness::Ready => {
                persist(self.store.as_ref(), tracked, EnvelopeState::Eligible, None).await?;
                info!(key = %tracked.key(), "Token mapping available, releasing held envelope");
            }
            Readiness::Hold(_) => {}
            Readiness::Wait(reason) => {
                debug!(key = %tracked.key(), reason = %reason, "Token registry unavailable");
            }
        }
        Ok(())
    }

    async fn submit_head(&mut self, lane_key: (u64, Address), now: Instant) -> Result<()> {
        let Some(lane) = self.lanes.get_mut(&lane_key) else {
            return Ok(());
        };
        if lane.in_flight || lane.is_paused(now) {
            return Ok(());
        }
        let Some(tracked) = lane.head_mut() else {
            return Ok(());
        };
        if tracked.state != EnvelopeState::Eligible {
            return Ok(());
        }

        match token_readiness(&self.registry, &tracked.envelope).await {
            Readiness::Ready => {}
            Readiness::Hold(reason) => {
                error!(key = %tracked.key(), reason = %reason, "Envelope not routable, holding lane");
                persist(self.store.as_ref(), tracked, EnvelopeState::Held, Some(reason)).await?;
                return Ok(());
            }
            Readiness::Wait(reason) => {
                warn!(key = %tracked.key(), reason = %reason, "Token registry unavailable, deferring submission");
                return Ok(());
            }
        }

        let last_error = tracked.last_error.clone();
        persist(
            self.store.as_ref(),
            tracked,
            EnvelopeState::Submitted,
            last_error,
        )
        .await?;

        debug!(
            key = %tracked.key(),
            attempts = tracked.attempts,
            "Submitting envelope"
        );

        let submitted = tracked.clone();
        lane.in_flight = true;

        let executor = self.executor.clone();
        let retry = self.config.retry.clone();
        let attempts = self.attempts.clone();
        self.tasks.spawn(async move {
            let envelope = submitted.envelope.clone();
            let prior = submitted.attempts;
            // Run the relay in its own task so a panic is reported against this envelope
            let mut relay = AbortOnDrop(tokio::spawn(async move {
                relay_with_retry(executor.as_ref(), &envelope, &retry, &attempts, prior).await
            }));
            let result = (&mut relay.0)
                .await
                .map_err(|e| format!("relay task failed: {}", e));
            SubmissionResult {
                tracked: submitted,
                result,
            }
        });
        Ok(())
    }

    /// Apply the result of a finished submission to its lane
    pub async fn settle(&mut self, result: SubmissionResult) {
        let key = result.tracked.key();
        let Some(lane) = self.lanes.get_mut(&key.lane()) else {
            warn!(key = %key, "Settled envelope has no lane");
            return;
        };
        lane.in_flight = false;

        let Some(tracked) = lane.pending.get_mut(&key.sequence) else {
            warn!(key = %key, "Settled envelope is no longer pending");
            return;
        };

        let (resolution, made) = result
            .result
            .unwrap_or_else(|e| (RelayResolution::Exhausted { last_error: e }, 0));
        tracked.attempts += made;
        let attempts = tracked.attempts;

        match resolution {
            RelayResolution::Applied { receipt, duplicate } => {
                if receipt.tx_hash.is_some() {
                    tracked.dest_tx_hash = receipt.tx_hash;
                }
                settle_state(self.store.as_ref(), tracked, EnvelopeState::Applied, None).await;
                info!(
                    key = %key,
                    duplicate,
                    attempts,
                    tx_hash = ?tracked.dest_tx_hash,
                    "Envelope applied"
                );
                metrics::record_outcome(
                    key.chain_id,
                    if duplicate { "rejected_duplicate" } else { "applied" },
                );
                lane.pending.remove(&key.sequence);
                lane.raise_watermark(key.sequence);
            }
            RelayResolution::RejectedInvalid { reason, tx_hash } => {
                tracked.dest_tx_hash = tx_hash;
                error!(
                    key = %key,
                    attempts,
                    reason = %reason,
                    "Destination rejected envelope as invalid"
                );
                settle_state(
                    self.store.as_ref(),
                    tracked,
                    EnvelopeState::RejectedInvalid,
                    Some(reason),
                )
                .await;
                metrics::record_outcome(key.chain_id, "rejected_invalid");
                lane.pending.remove(&key.sequence);
                lane.raise_watermark(key.sequence);
            }
            RelayResolution::Exhausted { last_error } => {
                error!(
                    key = %key,
                    attempts,
                    pause_secs = self.config.lane_pause.as_secs(),
                    error = %last_error,
                    "Relay retries exhausted, pausing lane"
                );
                settle_state(
                    self.store.as_ref(),
                    tracked,
                    EnvelopeState::Eligible,
                    Some(last_error),
                )
                .await;
                metrics::record_escalation(key.chain_id);
                lane.paused_until = Some(Instant::now() + self.config.lane_pause);
            }
        }

        self.refresh_gauges();
    }

    /// Wait for the next in-flight submission and settle it. `None` when idle.
    pub async fn settle_next(&mut self) -> Option<Result<()>> {
        let joined = self.tasks.join_next().await?;
        Some(match joined {
            Ok(result) => {
                self.settle(result).await;
                Ok(())
            }
            Err(e) => Err(eyre!("Submission task aborted: {}", e)),
        })
    }

    /// Settle every in-flight submission
    pub async fn drain(&mut self) -> Result<()> {
        while let Some(settled) = self.settle_next().await {
            settled?;
        }
        Ok(())
    }

    fn refresh_gauges(&self) {
        let held = self
            .lanes
            .values()
            .flat_map(|lane| lane.pending.values())
            .filter(|tracked| tracked.state == EnvelopeState::Held)
            .count();
        metrics::set_held(held);
        metrics::set_in_flight(self.tasks.len());
    }

    // ========================================================================
    // Main Loop
    // ========================================================================

    /// Run until a shutdown signal. In-flight submissions are abandoned on
    /// shutdown; the next start resumes them from the store.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WatcherEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<()> {
        self.resume().await?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(
                        in_flight = self.tasks.len(),
                        "Orchestrator shutting down, abandoning in-flight submissions"
                    );
                    self.tasks.abort_all();
                    return Ok(());
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            error!(error = %e, "Failed to handle watcher event");
                            metrics::record_error("orchestrator");
                        }
                    }
                    None => {
                        warn!("Watcher channel closed");
                        events_open = false;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            self.settle(result).await;
                            self.advance().await;
                        }
                        Err(e) => {
                            error!(error = %e, "Submission task aborted");
                            metrics::record_error("orchestrator");
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.advance().await;
                }
            }
        }
    }
}

/// Check that an envelope's asset has a destination mapping
async fn token_readiness(registry: &CachedTokenRegistry, envelope: &Envelope) -> Readiness {
    if Topic::from_u32(envelope.message.topic) != Some(Topic::Transfer) {
        return Readiness::Ready;
    }

    let payload = match TransferPayload::from_bytes(&envelope.message.payload) {
        Ok(payload) => payload,
        Err(reason) => return Readiness::Hold(format!("undecodable transfer payload: {}", reason)),
    };

    match registry
        .resolve(envelope.source.chain_id, payload.asset)
        .await
    {
        Ok(_) => Readiness::Ready,
        Err(e) if e.is_configuration() => Readiness::Hold(e.to_string()),
        Err(e) => Readiness::Wait(e.to_string()),
    }
}

/// First state of an admitted envelope: held when no topic handler routes it
fn route_state(
    validator: &EnvelopeValidator,
    envelope: &Envelope,
) -> (EnvelopeState, Option<String>) {
    match validator.check_route(envelope) {
        Ok(()) => (EnvelopeState::ConfirmationsPending, None),
        Err(e) => (EnvelopeState::Held, Some(e.to_string())),
    }
}

/// Store a newly observed envelope and move it out of `Observed`.
///
/// The insert is usually a no-op since the watcher persists before
/// advancing its cursor.
async fn record_observed(
    store: &dyn EnvelopeStore,
    tracked: &mut TrackedEnvelope,
    next: EnvelopeState,
    last_error: Option<String>,
) -> Result<()> {
    store.insert_observed(&tracked.envelope).await?;
    persist(store, tracked, next, last_error).await
}

/// Persist a transition, committing it in memory only once the store accepted it
async fn persist(
    store: &dyn EnvelopeStore,
    tracked: &mut TrackedEnvelope,
    next: EnvelopeState,
    last_error: Option<String>,
) -> Result<()> {
    let mut updated = tracked.clone();
    updated.transition(next)?;
    updated.last_error = last_error;
    store.save_state(&updated).await?;
    *tracked = updated;
    Ok(())
}

/// Commit a settled outcome in memory even if the store write fails.
///
/// A lost write leaves the store at `Submitted`, which resumes as `Eligible`
/// and is resolved by the ledger pre-check.
async fn settle_state(
    store: &dyn EnvelopeStore,
    tracked: &mut TrackedEnvelope,
    next: EnvelopeState,
    last_error: Option<String>,
) {
    if let Err(e) = tracked.transition(next) {
        error!(error = %e, "Rejected state transition");
        return;
    }
    tracked.last_error = last_error;
    if let Err(e) = store.save_state(tracked).await {
        error!(key = %tracked.key(), error = %e, "Failed to persist settled envelope");
        metrics::record_error("store");
    }
}
