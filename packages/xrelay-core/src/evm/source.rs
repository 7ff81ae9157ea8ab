//! Source-chain polling client
//!
//! Fetches publish logs for a block range from the bus contract, chunked to
//! stay under provider range limits, and groups them into receipts.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::debug;

use crate::evm::events::{group_into_receipts, LogMessagePublished, SourceReceipt};

/// Read-only view of a source chain, injected into each watcher
#[async_trait]
pub trait SourceChain: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Latest block number
    async fn head(&self) -> Result<u64>;

    /// Receipts carrying bus logs in `[from_block, to_block]`
    async fn receipts(&self, from_block: u64, to_block: u64) -> Result<Vec<SourceReceipt>>;
}

pub struct EvmSource {
    provider: RootProvider<Http<Client>>,
    chain_id: u64,
    bus_address: Address,
    max_block_range: u64,
}

impl EvmSource {
    pub fn new(rpc_url: &str, chain_id: u64, bus_address: Address, max_block_range: u64) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Failed to parse source RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            chain_id,
            bus_address,
            max_block_range: max_block_range.max(1),
        })
    }
}

#[async_trait]
impl SourceChain for EvmSource {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn head(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("Failed to fetch head of chain {}", self.chain_id))
    }

    async fn receipts(&self, from_block: u64, to_block: u64) -> Result<Vec<SourceReceipt>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            let current_to = std::cmp::min(current_from + self.max_block_range - 1, to_block);

            let filter = Filter::new()
                .address(self.bus_address)
                .event_signature(LogMessagePublished::SIGNATURE_HASH)
                .from_block(current_from)
                .to_block(current_to);

            let logs = self.provider.get_logs(&filter).await.wrap_err_with(|| {
                format!(
                    "Failed to fetch logs {}..={} on chain {}",
                    current_from, current_to, self.chain_id
                )
            })?;

            debug!(
                chain_id = self.chain_id,
                from_block = current_from,
                to_block = current_to,
                count = logs.len(),
                "Fetched bus logs"
            );

            all_logs.extend(logs);
            current_from = current_to + 1;
        }

        Ok(group_into_receipts(all_logs)?)
    }
}
