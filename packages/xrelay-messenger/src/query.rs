//! Query handlers.

use cosmwasm_std::{Addr, Deps, Order, StdResult};
use cw_storage_plus::Bound;

use crate::msg::{
    BalanceResponse, ConfigResponse, IsAppliedResponse, LedgerEntryInfo, LedgerEntryResponse,
    RelayersResponse, StatsResponse, TokenMappingKey, TokenMappingResponse, TokenMappingsResponse,
};
use crate::payload::normalize_evm_address;
use crate::state::{BALANCES, CONFIG, LEDGER, RELAYERS, STATS, TOKEN_MAPPINGS};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 30;

/// Invalid addresses surface as a generic query error
fn normalized(address: &str) -> StdResult<String> {
    normalize_evm_address(address).map_err(|e| cosmwasm_std::StdError::generic_err(e.to_string()))
}

pub fn query_config(deps: Deps) -> StdResult<ConfigResponse> {
    let config = CONFIG.load(deps.storage)?;
    Ok(ConfigResponse {
        admin: config.admin,
        paused: config.paused,
    })
}

pub fn query_stats(deps: Deps) -> StdResult<StatsResponse> {
    let stats = STATS.load(deps.storage)?;
    let relayer_count = RELAYERS
        .keys(deps.storage, None, None, Order::Ascending)
        .count() as u32;
    let token_mapping_count = TOKEN_MAPPINGS
        .keys(deps.storage, None, None, Order::Ascending)
        .count() as u32;

    Ok(StatsResponse {
        applied_count: stats.applied_count,
        relayer_count,
        token_mapping_count,
    })
}

pub fn query_relayers(deps: Deps) -> StdResult<RelayersResponse> {
    let relayers = RELAYERS
        .keys(deps.storage, None, None, Order::Ascending)
        .collect::<StdResult<Vec<Addr>>>()?;
    Ok(RelayersResponse { relayers })
}

// ============================================================================
// Token Registry
// ============================================================================

pub fn query_token_mapping(
    deps: Deps,
    source_chain: u64,
    remote_token: String,
) -> StdResult<TokenMappingResponse> {
    let remote_token = normalized(&remote_token)?;
    let local_token = TOKEN_MAPPINGS.may_load(deps.storage, (source_chain, remote_token.as_str()))?;

    Ok(TokenMappingResponse {
        source_chain,
        remote_token,
        local_token,
    })
}

pub fn query_token_mappings(
    deps: Deps,
    start_after: Option<TokenMappingKey>,
    limit: Option<u32>,
) -> StdResult<TokenMappingsResponse> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    let start_key = match start_after {
        Some(key) => Some((key.source_chain, normalized(&key.remote_token)?)),
        None => None,
    };
    let start = start_key
        .as_ref()
        .map(|(chain, token)| Bound::exclusive((*chain, token.as_str())));

    let mappings = TOKEN_MAPPINGS
        .range(deps.storage, start, None, Order::Ascending)
        .take(limit)
        .map(|item| {
            let ((source_chain, remote_token), local_token) = item?;
            Ok(TokenMappingResponse {
                source_chain,
                remote_token,
                local_token: Some(local_token),
            })
        })
        .collect::<StdResult<Vec<_>>>()?;

    Ok(TokenMappingsResponse { mappings })
}

// ============================================================================
// Ledger
// ============================================================================

pub fn query_is_applied(
    deps: Deps,
    source_chain: u64,
    sender: String,
    sequence: u64,
) -> StdResult<IsAppliedResponse> {
    let sender = normalized(&sender)?;
    Ok(IsAppliedResponse {
        applied: LEDGER.has(deps.storage, (source_chain, sender.as_str(), sequence)),
    })
}

pub fn query_ledger_entry(
    deps: Deps,
    source_chain: u64,
    sender: String,
    sequence: u64,
) -> StdResult<LedgerEntryResponse> {
    let sender = normalized(&sender)?;
    let entry = LEDGER
        .may_load(deps.storage, (source_chain, sender.as_str(), sequence))?
        .map(|entry| LedgerEntryInfo {
            local_token: entry.local_token,
            recipient: entry.recipient,
            amount: entry.amount,
            nonce: entry.nonce,
            applied_at_height: entry.applied_at_height,
            relayer: entry.relayer,
        });
    Ok(LedgerEntryResponse { entry })
}

pub fn query_balance(deps: Deps, local_token: String, account: String) -> StdResult<BalanceResponse> {
    let account = normalized(&account)?;
    let balance = BALANCES
        .may_load(deps.storage, (local_token.as_str(), account.as_str()))?
        .unwrap_or_default();

    Ok(BalanceResponse {
        local_token,
        account,
        balance,
    })
}
