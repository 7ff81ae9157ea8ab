//! Source chain watcher
//!
//! Polls one source chain for bus receipts, decodes them into envelopes,
//! persists each as `Observed` and forwards it to the orchestrator. The
//! block cursor only advances past a range once every receipt in it was
//! decoded and persisted, so a receipt that fails to decode stalls the chain
//! at that range instead of being skipped.

use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use xrelay_core::evm::{EventDecoder, SourceChain};

use crate::metrics;
use crate::store::EnvelopeStore;
use crate::watchers::WatcherEvent;

pub struct SourceWatcher {
    name: String,
    source: Arc<dyn SourceChain>,
    store: Arc<dyn EnvelopeStore>,
    decoder: EventDecoder,
    events: mpsc::Sender<WatcherEvent>,
    start_block: u64,
    poll_interval: Duration,
    max_block_range: u64,
}

impl SourceWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn SourceChain>,
        store: Arc<dyn EnvelopeStore>,
        decoder: EventDecoder,
        events: mpsc::Sender<WatcherEvent>,
        start_block: u64,
        poll_interval: Duration,
        max_block_range: u64,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            store,
            decoder,
            events,
            start_block,
            poll_interval,
            max_block_range: max_block_range.max(1),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.source.chain_id()
    }

    /// Run the watcher loop. Poll errors are logged and retried after the
    /// poll interval; only a closed orchestrator channel ends the loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            chain = %self.name,
            chain_id = self.chain_id(),
            start_block = self.start_block,
            "Starting source watcher"
        );

        loop {
            if let Err(e) = self.poll_once().await {
                if self.events.is_closed() {
                    return Err(e.wrap_err("Orchestrator channel closed"));
                }
                error!(
                    chain = %self.name,
                    chain_id = self.chain_id(),
                    error = %format!("{:#}", e),
                    "Source poll failed"
                );
                metrics::record_error("watcher");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll: report the head, then process every block after the cursor.
    /// Returns the last block processed, or `None` when there was nothing new.
    pub async fn poll_once(&self) -> Result<Option<u64>> {
        let chain_id = self.chain_id();

        let head = self.source.head().await?;
        metrics::record_source_head(chain_id, head);
        self.send(WatcherEvent::Head {
            chain_id,
            block: head,
        })
        .await?;

        let from_block = match self.store.last_block(chain_id).await? {
            Some(last) => last + 1,
            None => self.start_block,
        };
        if from_block > head {
            return Ok(None);
        }

        let mut current_from = from_block;
        while current_from <= head {
            let current_to = std::cmp::min(current_from + self.max_block_range - 1, head);
            self.process_range(current_from, current_to).await?;

            self.store.set_last_block(chain_id, current_to).await?;
            metrics::record_source_cursor(chain_id, current_to);
            current_from = current_to + 1;
        }

        Ok(Some(head))
    }

    async fn process_range(&self, from_block: u64, to_block: u64) -> Result<()> {
        let chain_id = self.chain_id();
        let receipts = self.source.receipts(from_block, to_block).await?;

        debug!(
            chain_id,
            from_block,
            to_block,
            receipts = receipts.len(),
            "Processing source blocks"
        );

        let mut observed = 0usize;
        for receipt in &receipts {
            let envelopes = match self.decoder.decode_receipt(receipt) {
                Ok(envelopes) => envelopes,
                Err(e) => {
                    error!(
                        chain_id,
                        tx_hash = %receipt.tx_hash,
                        block = receipt.block_number,
                        error = %e,
                        "Failed to decode receipt, halting cursor"
                    );
                    metrics::record_decode_error(chain_id);
                    return Err(eyre!(e).wrap_err(format!(
                        "Undecodable receipt {} in block {}",
                        receipt.tx_hash, receipt.block_number
                    )));
                }
            };

            for envelope in envelopes {
                let is_new = self
                    .store
                    .insert_observed(&envelope)
                    .await
                    .wrap_err("Failed to persist observed envelope")?;
                if is_new {
                    info!(
                        key = %envelope.key(),
                        tx_hash = %envelope.source.tx_hash,
                        log_index = envelope.source.log_index,
                        "New envelope observed"
                    );
                    observed += 1;
                }
                self.send(WatcherEvent::Observed(envelope)).await?;
            }
        }

        if observed > 0 {
            metrics::record_observed(chain_id, observed);
        }
        Ok(())
    }

    async fn send(&self, event: WatcherEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| eyre!("Orchestrator channel closed"))
    }
}
