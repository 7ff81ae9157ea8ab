//! XRelay Messenger Contract - Entry Points
//!
//! The implementation is modularized into:
//! - `execute/` - Execute message handlers
//! - `query` - Query message handlers

use cosmwasm_std::{
    entry_point, to_json_binary, Binary, Deps, DepsMut, Env, MessageInfo, Response, StdResult,
};
use cw2::set_contract_version;

use crate::error::ContractError;
use crate::execute::{
    execute_add_relayer, execute_pause, execute_register_token, execute_relay_message,
    execute_remove_relayer, execute_unpause,
};
use crate::msg::{ExecuteMsg, InstantiateMsg, MigrateMsg, QueryMsg};
use crate::query::{
    query_balance, query_config, query_is_applied, query_ledger_entry, query_relayers,
    query_stats, query_token_mapping, query_token_mappings,
};
use crate::state::{Config, Stats, CONFIG, CONTRACT_NAME, CONTRACT_VERSION, RELAYERS, STATS};

// ============================================================================
// Instantiate
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn instantiate(
    deps: DepsMut,
    _env: Env,
    _info: MessageInfo,
    msg: InstantiateMsg,
) -> Result<Response, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    let admin = deps.api.addr_validate(&msg.admin)?;

    for relayer in &msg.relayers {
        let relayer_addr = deps.api.addr_validate(relayer)?;
        RELAYERS.save(deps.storage, &relayer_addr, &true)?;
    }

    CONFIG.save(
        deps.storage,
        &Config {
            admin: admin.clone(),
            paused: false,
        },
    )?;
    STATS.save(deps.storage, &Stats::default())?;

    Ok(Response::new()
        .add_attribute("method", "instantiate")
        .add_attribute("admin", admin)
        .add_attribute("relayers", msg.relayers.len().to_string()))
}

// ============================================================================
// Execute
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn execute(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    msg: ExecuteMsg,
) -> Result<Response, ContractError> {
    match msg {
        ExecuteMsg::RelayMessage { message } => execute_relay_message(deps, env, info, message),
        ExecuteMsg::RegisterToken {
            source_chain,
            remote_token,
            local_token,
        } => execute_register_token(deps, info, source_chain, remote_token, local_token),
        ExecuteMsg::AddRelayer { relayer } => execute_add_relayer(deps, info, relayer),
        ExecuteMsg::RemoveRelayer { relayer } => execute_remove_relayer(deps, info, relayer),
        ExecuteMsg::Pause {} => execute_pause(deps, info),
        ExecuteMsg::Unpause {} => execute_unpause(deps, info),
    }
}

// ============================================================================
// Query
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn query(deps: Deps, _env: Env, msg: QueryMsg) -> StdResult<Binary> {
    match msg {
        QueryMsg::Config {} => to_json_binary(&query_config(deps)?),
        QueryMsg::Stats {} => to_json_binary(&query_stats(deps)?),
        QueryMsg::Relayers {} => to_json_binary(&query_relayers(deps)?),
        QueryMsg::TokenMapping {
            source_chain,
            remote_token,
        } => to_json_binary(&query_token_mapping(deps, source_chain, remote_token)?),
        QueryMsg::TokenMappings { start_after, limit } => {
            to_json_binary(&query_token_mappings(deps, start_after, limit)?)
        }
        QueryMsg::IsApplied {
            source_chain,
            sender,
            sequence,
        } => to_json_binary(&query_is_applied(deps, source_chain, sender, sequence)?),
        QueryMsg::LedgerEntry {
            source_chain,
            sender,
            sequence,
        } => to_json_binary(&query_ledger_entry(deps, source_chain, sender, sequence)?),
        QueryMsg::Balance {
            local_token,
            account,
        } => to_json_binary(&query_balance(deps, local_token, account)?),
    }
}

// ============================================================================
// Migrate
// ============================================================================

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn migrate(deps: DepsMut, _env: Env, _msg: MigrateMsg) -> Result<Response, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;
    Ok(Response::new()
        .add_attribute("method", "migrate")
        .add_attribute("version", CONTRACT_VERSION))
}
