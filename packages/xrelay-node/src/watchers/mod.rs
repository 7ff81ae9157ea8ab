use eyre::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use xrelay_core::Envelope;

pub mod source;

pub use source::SourceWatcher;

/// What watchers report to the orchestrator
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// A decoded envelope, already persisted as `Observed`
    Observed(Envelope),
    /// Latest head of a source chain, used for confirmation counting
    Head { chain_id: u64, block: u64 },
}

/// Manages one watcher per source chain
pub struct WatcherManager {
    watchers: Vec<SourceWatcher>,
}

impl WatcherManager {
    pub fn new(watchers: Vec<SourceWatcher>) -> Self {
        let mut seen_chain_ids = std::collections::HashMap::new();
        for watcher in &watchers {
            *seen_chain_ids.entry(watcher.chain_id()).or_insert(0u32) += 1;
        }
        for (&chain_id, &count) in &seen_chain_ids {
            if count > 1 {
                warn!(chain_id, count, "Duplicate source watcher for chain");
            }
        }
        info!(
            watchers = watchers.len(),
            chain_ids = ?seen_chain_ids.keys().collect::<Vec<_>>(),
            "Watcher manager created"
        );

        Self { watchers }
    }

    /// Run all watchers concurrently.
    /// Returns when any watcher stops or a shutdown signal is received.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for watcher in self.watchers {
            join_set.spawn(async move { watcher.run().await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping watchers");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A watcher exited unexpectedly without error");
                        Err(eyre::eyre!("watcher exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A watcher stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A watcher task panicked: {:?}", e);
                        Err(eyre::eyre!("watcher task panicked: {}", e))
                    }
                    None => {
                        warn!("No source watchers configured");
                        // Nothing to watch; idle until shutdown
                        let _ = shutdown.recv().await;
                        Ok(())
                    }
                }
            }
        }
    }
}
