//! Message types for the messenger contract

use cosmwasm_schema::{cw_serde, QueryResponses};
use cosmwasm_std::{Addr, Binary, Uint128};

// ============================================================================
// Instantiate & Migrate
// ============================================================================

#[cw_serde]
pub struct MigrateMsg {}

#[cw_serde]
pub struct InstantiateMsg {
    /// Admin address for registry and relayer management
    pub admin: String,
    /// Accounts allowed to submit relayed messages
    pub relayers: Vec<String>,
}

// ============================================================================
// Execute Messages
// ============================================================================

/// A source-chain message as carried by the relay
#[cw_serde]
pub struct RelayedMessage {
    /// Chain id of the source bus
    pub source_chain: u64,
    /// Source sender, `0x`-prefixed 20-byte hex
    pub sender: String,
    pub sequence: u64,
    pub nonce: u32,
    pub topic: u32,
    pub payload: Binary,
    pub consistency_level: u8,
}

#[cw_serde]
pub enum ExecuteMsg {
    // ========================================================================
    // Relay
    // ========================================================================
    /// Apply a relayed message exactly once (relayers only)
    RelayMessage { message: RelayedMessage },

    // ========================================================================
    // Token Registry (admin)
    // ========================================================================
    /// Map a source asset to its local counterpart. Idempotent for the same pair.
    RegisterToken {
        source_chain: u64,
        remote_token: String,
        local_token: String,
    },

    // ========================================================================
    // Admin
    // ========================================================================
    AddRelayer { relayer: String },
    RemoveRelayer { relayer: String },
    Pause {},
    Unpause {},
}

// ============================================================================
// Query Messages
// ============================================================================

#[cw_serde]
#[derive(QueryResponses)]
pub enum QueryMsg {
    #[returns(ConfigResponse)]
    Config {},

    #[returns(StatsResponse)]
    Stats {},

    #[returns(RelayersResponse)]
    Relayers {},

    /// Local token for a source asset, `None` when unmapped
    #[returns(TokenMappingResponse)]
    TokenMapping {
        source_chain: u64,
        remote_token: String,
    },

    #[returns(TokenMappingsResponse)]
    TokenMappings {
        start_after: Option<TokenMappingKey>,
        limit: Option<u32>,
    },

    /// Whether `(source_chain, sender, sequence)` has a ledger entry
    #[returns(IsAppliedResponse)]
    IsApplied {
        source_chain: u64,
        sender: String,
        sequence: u64,
    },

    #[returns(LedgerEntryResponse)]
    LedgerEntry {
        source_chain: u64,
        sender: String,
        sequence: u64,
    },

    /// Mirrored balance of `account` (`0x` hex) in `local_token`
    #[returns(BalanceResponse)]
    Balance { local_token: String, account: String },
}

// ============================================================================
// Query Responses
// ============================================================================

#[cw_serde]
pub struct ConfigResponse {
    pub admin: Addr,
    pub paused: bool,
}

#[cw_serde]
pub struct StatsResponse {
    pub applied_count: u64,
    pub relayer_count: u32,
    pub token_mapping_count: u32,
}

#[cw_serde]
pub struct RelayersResponse {
    pub relayers: Vec<Addr>,
}

#[cw_serde]
pub struct TokenMappingKey {
    pub source_chain: u64,
    pub remote_token: String,
}

#[cw_serde]
pub struct TokenMappingResponse {
    pub source_chain: u64,
    pub remote_token: String,
    pub local_token: Option<String>,
}

#[cw_serde]
pub struct TokenMappingsResponse {
    pub mappings: Vec<TokenMappingResponse>,
}

#[cw_serde]
pub struct IsAppliedResponse {
    pub applied: bool,
}

#[cw_serde]
pub struct LedgerEntryResponse {
    pub entry: Option<LedgerEntryInfo>,
}

#[cw_serde]
pub struct LedgerEntryInfo {
    pub local_token: String,
    pub recipient: String,
    pub amount: Uint128,
    pub nonce: u32,
    pub applied_at_height: u64,
    pub relayer: Addr,
}

#[cw_serde]
pub struct BalanceResponse {
    pub local_token: String,
    pub account: String,
    pub balance: Uint128,
}
