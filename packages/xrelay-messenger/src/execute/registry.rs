//! Token registry handler.

use cosmwasm_std::{DepsMut, MessageInfo, Response};

use crate::error::ContractError;
use crate::payload::normalize_evm_address;
use crate::state::{CONFIG, TOKEN_MAPPINGS};

/// Register `(source_chain, remote_token) -> local_token` (admin only).
///
/// Registering an identical pair again succeeds without writing; a different
/// local token for an existing remote token fails with `MappingConflict`.
pub fn execute_register_token(
    deps: DepsMut,
    info: MessageInfo,
    source_chain: u64,
    remote_token: String,
    local_token: String,
) -> Result<Response, ContractError> {
    let config = CONFIG.load(deps.storage)?;
    if info.sender != config.admin {
        return Err(ContractError::Unauthorized);
    }

    let remote_token = normalize_evm_address(&remote_token)?;
    let local_token = local_token.trim().to_string();
    if local_token.is_empty() {
        return Err(ContractError::InvalidLocalToken);
    }

    let key = (source_chain, remote_token.as_str());
    let created = match TOKEN_MAPPINGS.may_load(deps.storage, key)? {
        Some(existing) if existing == local_token => false,
        Some(existing) => {
            return Err(ContractError::MappingConflict {
                remote_token,
                existing,
                requested: local_token,
            })
        }
        None => {
            TOKEN_MAPPINGS.save(deps.storage, key, &local_token)?;
            true
        }
    };

    Ok(Response::new()
        .add_attribute("method", "register_token")
        .add_attribute("source_chain", source_chain.to_string())
        .add_attribute("remote_token", remote_token)
        .add_attribute("local_token", local_token)
        .add_attribute("created", created.to_string()))
}
