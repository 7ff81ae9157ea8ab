//! State definitions for the messenger contract

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Uint128};
use cw_storage_plus::{Item, Map};

pub const CONTRACT_NAME: &str = "crates.io:xrelay-messenger";
pub const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Core Configuration
// ============================================================================

#[cw_serde]
pub struct Config {
    pub admin: Addr,
    pub paused: bool,
}

#[cw_serde]
#[derive(Default)]
pub struct Stats {
    pub applied_count: u64,
}

pub const CONFIG: Item<Config> = Item::new("config");
pub const STATS: Item<Stats> = Item::new("stats");

/// Accounts allowed to call `RelayMessage`
pub const RELAYERS: Map<&Addr, bool> = Map::new("relayers");

// ============================================================================
// Token Registry
// ============================================================================

/// (source_chain, remote_token) -> local_token
///
/// `remote_token` is stored as lowercase `0x` hex. Entries are never
/// overwritten or removed.
pub const TOKEN_MAPPINGS: Map<(u64, &str), String> = Map::new("token_mappings");

// ============================================================================
// Idempotency Ledger
// ============================================================================

/// What was credited when a message was applied
#[cw_serde]
pub struct LedgerEntry {
    pub local_token: String,
    pub recipient: String,
    pub amount: Uint128,
    pub nonce: u32,
    pub applied_at_height: u64,
    pub relayer: Addr,
}

/// (source_chain, sender, sequence) -> entry
///
/// Written only by `execute::relay::record_and_credit`, in the same
/// execution as the matching `BALANCES` update.
pub const LEDGER: Map<(u64, &str, u64), LedgerEntry> = Map::new("ledger");

/// (local_token, account) -> mirrored balance
pub const BALANCES: Map<(&str, &str), Uint128> = Map::new("balances");
