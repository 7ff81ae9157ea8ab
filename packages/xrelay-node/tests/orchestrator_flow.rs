//! Relay flow tests against an in-memory messenger
//!
//! `MockMessenger` keeps the same ledger and balance rules as the messenger
//! contract and answers with the contract's error strings, so outcomes go
//! through the same `classify_rejection` path as a real destination.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, Log, LogData, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

use xrelay_core::evm::{EventDecoder, LogMessagePublished, ReceiptLog, SourceChain, SourceReceipt};
use xrelay_core::{
    CachedTokenRegistry, CrossChainMessage, Envelope, MessageKey, SourceRef, TokenMappingSource,
    TokenRegistry, Topic, TransferPayload,
};
use xrelay_node::orchestrator::RetryConfig;
use xrelay_node::{
    classify_rejection, metrics, EnvelopeState, EnvelopeStore, ExecutionReceipt, MemoryStore,
    Orchestrator, OrchestratorConfig, RelayExecutor, RelayOutcome, SourceWatcher,
    TrackedEnvelope, WatcherEvent, Watermark,
};

const CHAIN: u64 = 31337;
const LOCAL_HOC: &str = "terra1hoc";

fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

fn hoc() -> Address {
    Address::repeat_byte(0x0c)
}

fn bus() -> Address {
    Address::repeat_byte(0xb5)
}

fn transfer_payload(recipient: Address, amount: u64) -> Bytes {
    Bytes::from(TransferPayload::new(hoc(), U256::from(amount), recipient).to_bytes())
}

fn transfer(sender: Address, sequence: u64, amount: u64, block: u64) -> Envelope {
    Envelope::new(
        CrossChainMessage {
            sender,
            sequence,
            nonce: sequence as u32,
            topic: Topic::Transfer.as_u32(),
            payload: transfer_payload(sender, amount),
            consistency_level: 2,
        },
        SourceRef {
            chain_id: CHAIN,
            tx_hash: B256::repeat_byte(sequence as u8),
            block_number: block,
            log_index: 0,
        },
    )
}

// ============================================================================
// Destination double
// ============================================================================

#[derive(Default)]
struct Ledger {
    applied: HashSet<MessageKey>,
    balances: HashMap<(String, Address), u128>,
    /// Every relay that reached the contract, in order
    submissions: Vec<MessageKey>,
    /// Outcomes forced before the ledger is consulted
    script: VecDeque<RelayOutcome>,
    tx_counter: u64,
}

struct MockMessenger {
    tokens: Arc<TokenRegistry>,
    ledger: Mutex<Ledger>,
}

impl MockMessenger {
    fn new(tokens: Arc<TokenRegistry>) -> Self {
        Self {
            tokens,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn script(&self, outcomes: impl IntoIterator<Item = RelayOutcome>) {
        self.ledger.lock().unwrap().script.extend(outcomes);
    }

    fn fail_next(&self, count: usize) {
        self.script((0..count).map(|_| RelayOutcome::Failed("connection reset by peer".into())));
    }

    fn mark_applied(&self, key: MessageKey) {
        self.ledger.lock().unwrap().applied.insert(key);
    }

    fn balance(&self, local_token: &str, account: Address) -> u128 {
        self.ledger
            .lock()
            .unwrap()
            .balances
            .get(&(local_token.to_string(), account))
            .copied()
            .unwrap_or(0)
    }

    fn submissions(&self) -> Vec<MessageKey> {
        self.ledger.lock().unwrap().submissions.clone()
    }

    fn apply(&self, envelope: &Envelope) -> Result<(), String> {
        let key = envelope.key();
        let mut ledger = self.ledger.lock().unwrap();
        ledger.submissions.push(key);

        if ledger.applied.contains(&key) {
            return Err(format!(
                "Message already applied: chain {} sender {} sequence {}",
                key.chain_id, key.sender, key.sequence
            ));
        }

        let payload = TransferPayload::from_bytes(&envelope.message.payload)
            .map_err(|reason| format!("Invalid payload: {}", reason))?;
        let amount = payload
            .amount_u128()
            .ok_or_else(|| "Invalid payload: amount exceeds 128 bits".to_string())?;
        let local_token = self
            .tokens
            .resolve(key.chain_id, payload.asset)
            .map_err(|_| format!("Unmapped token: {} from chain {}", payload.asset, key.chain_id))?;

        // Ledger entry and credit land together
        ledger.applied.insert(key);
        *ledger
            .balances
            .entry((local_token, payload.recipient))
            .or_default() += amount;
        Ok(())
    }
}

#[async_trait]
impl RelayExecutor for MockMessenger {
    async fn relay(&self, envelope: &Envelope) -> ExecutionReceipt {
        let scripted = self.ledger.lock().unwrap().script.pop_front();
        if let Some(outcome) = scripted {
            return ExecutionReceipt::new(outcome);
        }

        match self.apply(envelope) {
            Ok(()) => {
                let mut ledger = self.ledger.lock().unwrap();
                ledger.tx_counter += 1;
                ExecutionReceipt::new(RelayOutcome::Applied)
                    .with_tx(format!("{:064X}", ledger.tx_counter), Some(ledger.tx_counter))
            }
            Err(raw_log) => ExecutionReceipt::new(classify_rejection(&raw_log)),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        },
        lane_pause: Duration::from_secs(3600),
        max_in_flight: 16,
        tick_interval: Duration::from_millis(10),
        confirmation_timeout: Duration::from_secs(1800),
        attempt_log_capacity: 64,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    tokens: Arc<TokenRegistry>,
    messenger: Arc<MockMessenger>,
}

impl Harness {
    fn new(register_hoc: bool) -> Self {
        let tokens = Arc::new(TokenRegistry::new());
        if register_hoc {
            tokens.register(CHAIN, hoc(), LOCAL_HOC).unwrap();
        }
        Self {
            store: Arc::new(MemoryStore::new()),
            messenger: Arc::new(MockMessenger::new(tokens.clone())),
            tokens,
        }
    }

    fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            self.store.clone(),
            self.messenger.clone(),
            registry(self.tokens.clone()),
        )
    }

    async fn state(&self, envelope: &Envelope) -> Option<EnvelopeState> {
        self.store.get(&envelope.key()).await.map(|t| t.state)
    }
}

fn registry(source: Arc<dyn TokenMappingSource>) -> Arc<CachedTokenRegistry> {
    // Negative entries expire at once so a late registration is seen next tick
    Arc::new(CachedTokenRegistry::new(
        source,
        Duration::from_secs(300),
        Duration::ZERO,
    ))
}

async fn observe(orchestrator: &mut Orchestrator, envelopes: &[Envelope], head: u64) {
    orchestrator
        .handle_event(WatcherEvent::Head {
            chain_id: CHAIN,
            block: head,
        })
        .await
        .unwrap();
    for envelope in envelopes {
        orchestrator
            .handle_event(WatcherEvent::Observed(envelope.clone()))
            .await
            .unwrap();
    }
}

/// Tick and settle until nothing is left to submit
async fn settle_all(orchestrator: &mut Orchestrator) {
    for _ in 0..32 {
        orchestrator.advance().await;
        if orchestrator.in_flight() == 0 {
            return;
        }
        orchestrator.drain().await.unwrap();
    }
    panic!("orchestrator kept submitting");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_hoc_deposit_is_credited_exactly_once() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let deposit = transfer(alice(), 1, 100_000, 10);

    observe(&mut orchestrator, &[deposit.clone()], 11).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 100_000);
    let stored = harness.store.get(&deposit.key()).await.unwrap();
    assert_eq!(stored.state, EnvelopeState::Applied);
    assert_eq!(stored.attempts, 1);
    assert!(stored.dest_tx_hash.is_some());
    assert_eq!(orchestrator.watermark(CHAIN, alice()), Some(1));

    // A second relay of the identical envelope changes nothing
    let receipt = harness.messenger.relay(&deposit).await;
    assert_eq!(receipt.outcome, RelayOutcome::RejectedDuplicate);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 100_000);

    // Re-observing it is ignored below the watermark
    observe(&mut orchestrator, &[deposit.clone()], 12).await;
    settle_all(&mut orchestrator).await;
    assert_eq!(harness.messenger.submissions().len(), 2);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 100_000);
}

#[tokio::test]
async fn test_waits_for_confirmations() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let deposit = transfer(alice(), 1, 500, 10);

    // Block 10 at head 10 has one confirmation, two are required
    observe(&mut orchestrator, &[deposit.clone()], 10).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(
        orchestrator.state_of(&deposit.key()),
        Some(EnvelopeState::ConfirmationsPending)
    );
    assert!(harness.messenger.submissions().is_empty());

    observe(&mut orchestrator, &[], 11).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(harness.state(&deposit).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 500);
}

#[tokio::test]
async fn test_sender_lane_submits_in_sequence_order() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let a1 = transfer(alice(), 1, 10, 10);
    let a2 = transfer(alice(), 2, 20, 10);
    let a3 = transfer(alice(), 3, 30, 11);
    let b1 = transfer(bob(), 1, 40, 10);

    observe(&mut orchestrator, &[a1.clone(), a2.clone(), a3.clone(), b1.clone()], 20).await;

    // One submission per lane, the two lanes run side by side
    orchestrator.advance().await;
    assert_eq!(orchestrator.in_flight(), 2);
    assert_eq!(orchestrator.state_of(&a1.key()), Some(EnvelopeState::Submitted));
    assert_eq!(orchestrator.state_of(&a2.key()), Some(EnvelopeState::Eligible));
    assert_eq!(orchestrator.state_of(&b1.key()), Some(EnvelopeState::Submitted));

    orchestrator.drain().await.unwrap();
    settle_all(&mut orchestrator).await;

    let alice_order: Vec<u64> = harness
        .messenger
        .submissions()
        .into_iter()
        .filter(|key| key.sender == alice())
        .map(|key| key.sequence)
        .collect();
    assert_eq!(alice_order, vec![1, 2, 3]);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 60);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, bob()), 40);
}

#[tokio::test]
async fn test_sequence_gaps_do_not_stall_the_lane() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let first = transfer(alice(), 1, 10, 10);
    let after_gap = transfer(alice(), 3, 30, 10);

    observe(&mut orchestrator, &[first.clone(), after_gap.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(harness.state(&first).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.state(&after_gap).await, Some(EnvelopeState::Applied));
    assert_eq!(orchestrator.watermark(CHAIN, alice()), Some(3));
}

#[tokio::test]
async fn test_unmapped_token_is_held_until_registered() {
    let harness = Harness::new(false);
    let mut orchestrator = harness.orchestrator(fast_config());
    let deposit = transfer(alice(), 1, 700, 10);
    let next = transfer(alice(), 2, 300, 10);

    observe(&mut orchestrator, &[deposit.clone(), next.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(orchestrator.state_of(&deposit.key()), Some(EnvelopeState::Held));
    // The held head blocks the rest of the lane
    assert_eq!(orchestrator.state_of(&next.key()), Some(EnvelopeState::Eligible));
    assert!(harness.messenger.submissions().is_empty());
    let stored = harness.store.get(&deposit.key()).await.unwrap();
    assert!(stored.last_error.unwrap().contains("Unmapped token"));

    harness.tokens.register(CHAIN, hoc(), LOCAL_HOC).unwrap();
    settle_all(&mut orchestrator).await;

    assert_eq!(harness.state(&deposit).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.state(&next).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 1_000);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let deposit = transfer(alice(), 1, 100, 10);
    harness.messenger.fail_next(2);

    observe(&mut orchestrator, &[deposit.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    let stored = harness.store.get(&deposit.key()).await.unwrap();
    assert_eq!(stored.state, EnvelopeState::Applied);
    assert_eq!(stored.attempts, 3);
    assert_eq!(orchestrator.attempt_log().len(), 3);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 100);
}

#[tokio::test]
async fn test_exhausted_retries_pause_only_that_lane() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let stuck = transfer(alice(), 1, 100, 10);
    let other = transfer(bob(), 1, 200, 10);
    // Alice is submitted first, so her three attempts take the whole script
    harness.messenger.fail_next(3);

    observe(&mut orchestrator, &[stuck.clone()], 20).await;
    settle_all(&mut orchestrator).await;
    observe(&mut orchestrator, &[other.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    assert_eq!(orchestrator.state_of(&stuck.key()), Some(EnvelopeState::Eligible));
    assert!(orchestrator.is_lane_paused(CHAIN, alice()));
    let stored = harness.store.get(&stuck.key()).await.unwrap();
    assert_eq!(stored.state, EnvelopeState::Eligible);
    assert_eq!(stored.attempts, 3);
    assert!(stored.last_error.is_some());

    assert_eq!(harness.state(&other).await, Some(EnvelopeState::Applied));
    assert!(!orchestrator.is_lane_paused(CHAIN, bob()));
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 0);
}

#[tokio::test]
async fn test_lane_resumes_after_pause() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(OrchestratorConfig {
        lane_pause: Duration::ZERO,
        ..fast_config()
    });
    let deposit = transfer(alice(), 1, 100, 10);
    harness.messenger.fail_next(3);

    observe(&mut orchestrator, &[deposit.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    let stored = harness.store.get(&deposit.key()).await.unwrap();
    assert_eq!(stored.state, EnvelopeState::Applied);
    assert_eq!(stored.attempts, 4);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 100);
}

#[tokio::test]
async fn test_invalid_rejection_is_terminal() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(fast_config());
    let rejected = transfer(alice(), 1, 100, 10);
    let next = transfer(alice(), 2, 250, 10);
    harness.messenger.script([classify_rejection(
        "Invalid address: recipient is not a valid account",
    )]);

    observe(&mut orchestrator, &[rejected.clone(), next.clone()], 20).await;
    settle_all(&mut orchestrator).await;

    let stored = harness.store.get(&rejected.key()).await.unwrap();
    assert_eq!(stored.state, EnvelopeState::RejectedInvalid);
    assert_eq!(stored.attempts, 1);
    assert!(stored.last_error.unwrap().contains("Invalid address"));

    assert_eq!(harness.state(&next).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 250);
}

#[tokio::test]
async fn test_resume_from_persisted_state() {
    let harness = Harness::new(true);
    let applied = transfer(alice(), 1, 100, 10);
    let in_doubt = transfer(alice(), 2, 200, 10);
    let fresh = transfer(alice(), 3, 300, 10);

    // A previous run applied #1, crashed after #2 landed on chain, and had
    // only observed #3
    let walk = |envelope: &Envelope, states: &[EnvelopeState]| {
        let mut tracked = TrackedEnvelope::observed(envelope.clone());
        for state in states {
            tracked.transition(*state).unwrap();
        }
        tracked
    };
    use EnvelopeState::*;
    for (envelope, states) in [
        (&applied, vec![ConfirmationsPending, Eligible, Submitted, Applied]),
        (&in_doubt, vec![ConfirmationsPending, Eligible, Submitted]),
        (&fresh, vec![]),
    ] {
        harness.store.insert_observed(envelope).await.unwrap();
        harness
            .store
            .save_state(&walk(envelope, states.as_slice()))
            .await
            .unwrap();
    }
    harness.messenger.mark_applied(in_doubt.key());

    let mut orchestrator = harness.orchestrator(fast_config());
    assert_eq!(orchestrator.resume().await.unwrap(), 2);
    assert_eq!(orchestrator.watermark(CHAIN, alice()), Some(1));
    assert_eq!(orchestrator.state_of(&in_doubt.key()), Some(Eligible));
    assert_eq!(orchestrator.state_of(&fresh.key()), Some(ConfirmationsPending));

    // A re-scan replays everything; only #2 and #3 reach the destination
    observe(
        &mut orchestrator,
        &[applied.clone(), in_doubt.clone(), fresh.clone()],
        20,
    )
    .await;
    settle_all(&mut orchestrator).await;

    let sequences: Vec<u64> = harness
        .messenger
        .submissions()
        .into_iter()
        .map(|key| key.sequence)
        .collect();
    assert_eq!(sequences, vec![2, 3]);
    assert_eq!(harness.state(&in_doubt).await, Some(Applied));
    assert_eq!(harness.state(&fresh).await, Some(Applied));
    // #2 was already credited by the lost run; only #3 adds here
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 300);
}

// ============================================================================
// Degraded dependencies
// ============================================================================

/// Store whose next `save_state` calls fail
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_saves: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>, failing_saves: usize) -> Self {
        Self {
            inner,
            failing_saves: AtomicUsize::new(failing_saves),
        }
    }
}

#[async_trait]
impl EnvelopeStore for FlakyStore {
    async fn insert_observed(&self, envelope: &Envelope) -> eyre::Result<bool> {
        self.inner.insert_observed(envelope).await
    }

    async fn save_state(&self, tracked: &TrackedEnvelope) -> eyre::Result<()> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(eyre::eyre!("connection refused"));
        }
        self.inner.save_state(tracked).await
    }

    async fn load_unfinished(&self) -> eyre::Result<Vec<TrackedEnvelope>> {
        self.inner.load_unfinished().await
    }

    async fn watermarks(&self) -> eyre::Result<Vec<Watermark>> {
        self.inner.watermarks().await
    }

    async fn count_by_state(&self) -> eyre::Result<Vec<(EnvelopeState, u64)>> {
        self.inner.count_by_state().await
    }

    async fn last_block(&self, chain_id: u64) -> eyre::Result<Option<u64>> {
        self.inner.last_block(chain_id).await
    }

    async fn set_last_block(&self, chain_id: u64, block: u64) -> eyre::Result<()> {
        self.inner.set_last_block(chain_id, block).await
    }
}

/// Mapping backend that is unreachable for its first lookups
struct FlakyMappings {
    tokens: Arc<TokenRegistry>,
    outages: AtomicUsize,
}

#[async_trait]
impl TokenMappingSource for FlakyMappings {
    async fn fetch_mapping(
        &self,
        source_chain: u64,
        remote_token: Address,
    ) -> eyre::Result<Option<String>> {
        let down = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if down.is_ok() {
            return Err(eyre::eyre!("lcd unreachable"));
        }
        self.tokens.fetch_mapping(source_chain, remote_token).await
    }
}

/// Executor whose relays never finish
#[derive(Default)]
struct HangingExecutor {
    started: AtomicBool,
    released: Arc<AtomicBool>,
}

struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayExecutor for HangingExecutor {
    async fn relay(&self, _envelope: &Envelope) -> ExecutionReceipt {
        self.started.store(true, Ordering::SeqCst);
        let _release = ReleaseOnDrop(self.released.clone());
        std::future::pending::<ExecutionReceipt>().await
    }
}

async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_failed_store_write_keeps_lane_order() {
    let harness = Harness::new(true);
    let store = Arc::new(FlakyStore::new(harness.store.clone(), 1));
    let mut orchestrator = Orchestrator::new(
        fast_config(),
        store,
        harness.messenger.clone(),
        registry(harness.tokens.clone()),
    );
    let first = transfer(alice(), 1, 10, 10);
    let second = transfer(alice(), 2, 20, 10);

    orchestrator
        .handle_event(WatcherEvent::Head {
            chain_id: CHAIN,
            block: 20,
        })
        .await
        .unwrap();
    assert!(orchestrator
        .handle_event(WatcherEvent::Observed(first.clone()))
        .await
        .is_err());
    assert_eq!(orchestrator.state_of(&first.key()), Some(EnvelopeState::Observed));
    orchestrator
        .handle_event(WatcherEvent::Observed(second.clone()))
        .await
        .unwrap();

    // The write is retried and #1 still goes first
    orchestrator.advance().await;
    assert_eq!(orchestrator.state_of(&first.key()), Some(EnvelopeState::Submitted));
    assert_eq!(orchestrator.state_of(&second.key()), Some(EnvelopeState::Eligible));
    assert_eq!(orchestrator.in_flight(), 1);

    settle_all(&mut orchestrator).await;
    let sequences: Vec<u64> = harness
        .messenger
        .submissions()
        .into_iter()
        .map(|key| key.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(harness.state(&first).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.state(&second).await, Some(EnvelopeState::Applied));

    // A re-delivery after the lane moved on changes nothing
    observe(&mut orchestrator, &[first.clone()], 21).await;
    settle_all(&mut orchestrator).await;
    assert_eq!(harness.messenger.submissions().len(), 2);
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 30);
}

#[tokio::test]
async fn test_slow_confirmation_raises_one_alarm() {
    let harness = Harness::new(true);
    let mut orchestrator = harness.orchestrator(OrchestratorConfig {
        confirmation_timeout: Duration::ZERO,
        ..fast_config()
    });
    let deposit = transfer(alice(), 1, 500, 10);
    let alarms = || {
        metrics::CONFIRMATION_TIMEOUTS
            .with_label_values(&[&CHAIN.to_string()])
            .get()
    };
    let before = alarms();

    // One confirmation of the two required
    observe(&mut orchestrator, &[deposit.clone()], 10).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    orchestrator.advance().await;
    orchestrator.advance().await;

    assert_eq!(alarms() - before, 1.0);
    assert_eq!(
        orchestrator.state_of(&deposit.key()),
        Some(EnvelopeState::ConfirmationsPending)
    );
    assert!(harness.messenger.submissions().is_empty());

    observe(&mut orchestrator, &[], 11).await;
    settle_all(&mut orchestrator).await;
    assert_eq!(harness.state(&deposit).await, Some(EnvelopeState::Applied));
    assert_eq!(alarms() - before, 1.0);
}

#[tokio::test]
async fn test_registry_outage_defers_without_holding() {
    let harness = Harness::new(true);
    let mappings = Arc::new(FlakyMappings {
        tokens: harness.tokens.clone(),
        outages: AtomicUsize::new(2),
    });
    let mut orchestrator = Orchestrator::new(
        fast_config(),
        harness.store.clone(),
        harness.messenger.clone(),
        registry(mappings),
    );
    let deposit = transfer(alice(), 1, 800, 10);

    observe(&mut orchestrator, &[deposit.clone()], 20).await;
    for _ in 0..2 {
        orchestrator.advance().await;
        assert_eq!(orchestrator.in_flight(), 0);
        assert_eq!(orchestrator.state_of(&deposit.key()), Some(EnvelopeState::Eligible));
    }
    assert!(!orchestrator.is_lane_paused(CHAIN, alice()));
    let stored = harness.store.get(&deposit.key()).await.unwrap();
    assert!(stored.last_error.is_none());
    assert!(harness.messenger.submissions().is_empty());

    settle_all(&mut orchestrator).await;
    assert_eq!(harness.state(&deposit).await, Some(EnvelopeState::Applied));
    assert_eq!(harness.messenger.balance(LOCAL_HOC, alice()), 800);
}

#[tokio::test]
async fn test_shutdown_stops_in_flight_relays() {
    let harness = Harness::new(true);
    let executor = Arc::new(HangingExecutor::default());
    let orchestrator = Orchestrator::new(
        fast_config(),
        harness.store.clone(),
        executor.clone(),
        registry(harness.tokens.clone()),
    );
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let running = tokio::spawn(orchestrator.run(events_rx, shutdown_rx));

    events_tx
        .send(WatcherEvent::Head {
            chain_id: CHAIN,
            block: 20,
        })
        .await
        .unwrap();
    events_tx
        .send(WatcherEvent::Observed(transfer(alice(), 1, 100, 10)))
        .await
        .unwrap();
    assert!(wait_for(&executor.started).await, "relay never started");

    shutdown_tx.send(()).await.unwrap();
    running.await.unwrap().unwrap();

    assert!(wait_for(&executor.released).await, "relay outlived shutdown");
}

// ============================================================================
// Watcher
// ============================================================================

struct ScriptedSource {
    head: u64,
    receipts: Vec<SourceReceipt>,
}

#[async_trait]
impl SourceChain for ScriptedSource {
    fn chain_id(&self) -> u64 {
        CHAIN
    }

    async fn head(&self) -> eyre::Result<u64> {
        Ok(self.head)
    }

    async fn receipts(&self, from_block: u64, to_block: u64) -> eyre::Result<Vec<SourceReceipt>> {
        Ok(self
            .receipts
            .iter()
            .filter(|r| r.block_number >= from_block && r.block_number <= to_block)
            .cloned()
            .collect())
    }
}

fn publish_receipt(sender: Address, sequence: u64, amount: u64, block: u64) -> SourceReceipt {
    let event = LogMessagePublished {
        sender,
        sequence,
        nonce: sequence as u32,
        topic: Topic::Transfer.as_u32(),
        payload: transfer_payload(sender, amount),
        consistencyLevel: 2,
    };
    SourceReceipt {
        tx_hash: B256::repeat_byte(sequence as u8),
        block_number: block,
        logs: vec![ReceiptLog {
            log_index: 0,
            log: Log {
                address: bus(),
                data: event.encode_log_data(),
            },
        }],
    }
}

fn malformed_receipt(block: u64) -> SourceReceipt {
    SourceReceipt {
        tx_hash: B256::repeat_byte(0xee),
        block_number: block,
        logs: vec![ReceiptLog {
            log_index: 0,
            log: Log {
                address: bus(),
                data: LogData::new_unchecked(
                    vec![LogMessagePublished::SIGNATURE_HASH],
                    Bytes::from(vec![0u8; 5]),
                ),
            },
        }],
    }
}

fn watcher(
    store: Arc<MemoryStore>,
    receipts: Vec<SourceReceipt>,
    head: u64,
    events: mpsc::Sender<WatcherEvent>,
) -> SourceWatcher {
    SourceWatcher::new(
        "anvil",
        Arc::new(ScriptedSource { head, receipts }),
        store,
        EventDecoder::new(CHAIN, bus()),
        events,
        1,
        Duration::from_millis(10),
        4,
    )
}

#[tokio::test]
async fn test_watcher_persists_and_forwards_envelopes() {
    let store = Arc::new(MemoryStore::new());
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = watcher(
        store.clone(),
        vec![
            publish_receipt(alice(), 1, 100_000, 3),
            publish_receipt(alice(), 2, 5, 9),
        ],
        10,
        tx,
    );

    assert_eq!(watcher.poll_once().await.unwrap(), Some(10));
    assert_eq!(store.last_block(CHAIN).await.unwrap(), Some(10));
    assert_eq!(store.all().await.len(), 2);

    let mut observed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let WatcherEvent::Observed(envelope) = event {
            observed.push(envelope.message.sequence);
        }
    }
    assert_eq!(observed, vec![1, 2]);

    // Nothing new above the cursor
    assert_eq!(watcher.poll_once().await.unwrap(), None);
}

#[tokio::test]
async fn test_undecodable_receipt_halts_the_cursor() {
    let store = Arc::new(MemoryStore::new());
    let (tx, _rx) = mpsc::channel(64);
    let watcher = watcher(
        store.clone(),
        vec![publish_receipt(alice(), 1, 100, 2), malformed_receipt(6)],
        10,
        tx,
    );

    // Blocks 1..=4 are fine, 5..=8 holds the bad receipt
    assert!(watcher.poll_once().await.is_err());
    assert_eq!(store.last_block(CHAIN).await.unwrap(), Some(4));

    // Every later poll stops at the same range
    assert!(watcher.poll_once().await.is_err());
    assert_eq!(store.last_block(CHAIN).await.unwrap(), Some(4));
}

#[tokio::test]
async fn test_end_to_end_from_source_log_to_credit() {
    let harness = Harness::new(true);
    let (events_tx, events_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let orchestrator = harness.orchestrator(fast_config());
    let running = tokio::spawn(orchestrator.run(events_rx, shutdown_rx));

    let watcher = watcher(
        harness.store.clone(),
        vec![publish_receipt(alice(), 1, 100_000, 5)],
        10,
        events_tx,
    );
    watcher.poll_once().await.unwrap();

    let mut credited = false;
    for _ in 0..200 {
        if harness.messenger.balance(LOCAL_HOC, alice()) == 100_000 {
            credited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(credited, "deposit was never credited");

    shutdown_tx.send(()).await.unwrap();
    running.await.unwrap().unwrap();

    let key = MessageKey {
        chain_id: CHAIN,
        sender: alice(),
        sequence: 1,
    };
    assert_eq!(
        harness.store.get(&key).await.map(|t| t.state),
        Some(EnvelopeState::Applied)
    );
}
