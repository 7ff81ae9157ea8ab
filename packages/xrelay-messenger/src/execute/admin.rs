//! Admin operations handlers.
//!
//! This module handles:
//! - Relayer set management
//! - Pause/unpause

use cosmwasm_std::{Deps, DepsMut, MessageInfo, Response};

use crate::error::ContractError;
use crate::state::{CONFIG, RELAYERS};

fn ensure_admin(deps: Deps, info: &MessageInfo) -> Result<(), ContractError> {
    let config = CONFIG.load(deps.storage)?;
    if info.sender != config.admin {
        return Err(ContractError::Unauthorized);
    }
    Ok(())
}

// ============================================================================
// Relayers
// ============================================================================

pub fn execute_add_relayer(
    deps: DepsMut,
    info: MessageInfo,
    relayer: String,
) -> Result<Response, ContractError> {
    ensure_admin(deps.as_ref(), &info)?;

    let relayer_addr = deps.api.addr_validate(&relayer)?;
    RELAYERS.save(deps.storage, &relayer_addr, &true)?;

    Ok(Response::new()
        .add_attribute("method", "add_relayer")
        .add_attribute("relayer", relayer_addr))
}

pub fn execute_remove_relayer(
    deps: DepsMut,
    info: MessageInfo,
    relayer: String,
) -> Result<Response, ContractError> {
    ensure_admin(deps.as_ref(), &info)?;

    let relayer_addr = deps.api.addr_validate(&relayer)?;
    RELAYERS.remove(deps.storage, &relayer_addr);

    Ok(Response::new()
        .add_attribute("method", "remove_relayer")
        .add_attribute("relayer", relayer_addr))
}

// ============================================================================
// Pause/Unpause
// ============================================================================

/// Pause the messenger (stops all relays).
pub fn execute_pause(deps: DepsMut, info: MessageInfo) -> Result<Response, ContractError> {
    ensure_admin(deps.as_ref(), &info)?;

    CONFIG.update(deps.storage, |mut config| -> Result<_, ContractError> {
        config.paused = true;
        Ok(config)
    })?;

    Ok(Response::new().add_attribute("method", "pause"))
}

/// Unpause the messenger (resumes relays).
pub fn execute_unpause(deps: DepsMut, info: MessageInfo) -> Result<Response, ContractError> {
    ensure_admin(deps.as_ref(), &info)?;

    CONFIG.update(deps.storage, |mut config| -> Result<_, ContractError> {
        config.paused = false;
        Ok(config)
    })?;

    Ok(Response::new().add_attribute("method", "unpause"))
}
