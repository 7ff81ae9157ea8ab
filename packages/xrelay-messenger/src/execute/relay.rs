//! RelayMessage handler.
//!
//! Order of checks:
//! 1. messenger not paused, caller is a relayer
//! 2. `(source_chain, sender, sequence)` has no ledger entry
//! 3. topic and payload are routable
//! 4. the asset has a token mapping
//!
//! Only then does `record_and_credit` write. Both of its writes happen in one
//! execution, so they commit together or not at all.

use cosmwasm_std::{DepsMut, Env, MessageInfo, Response, StdResult, Storage, Uint128};

use crate::error::ContractError;
use crate::msg::RelayedMessage;
use crate::payload::{decode_transfer, normalize_evm_address, TRANSFER_TOPIC};
use crate::state::{LedgerEntry, BALANCES, CONFIG, LEDGER, RELAYERS, STATS, TOKEN_MAPPINGS};

pub fn execute_relay_message(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    message: RelayedMessage,
) -> Result<Response, ContractError> {
    let config = CONFIG.load(deps.storage)?;
    if config.paused {
        return Err(ContractError::Paused);
    }
    if !RELAYERS.has(deps.storage, &info.sender) {
        return Err(ContractError::UnauthorizedRelayer);
    }

    let sender = normalize_evm_address(&message.sender)?;
    let ledger_key = (message.source_chain, sender.as_str(), message.sequence);

    if LEDGER.has(deps.storage, ledger_key) {
        return Err(ContractError::AlreadyApplied {
            source_chain: message.source_chain,
            sender: sender.clone(),
            sequence: message.sequence,
        });
    }

    if message.topic != TRANSFER_TOPIC {
        return Err(ContractError::UnroutableMessage {
            topic: message.topic,
        });
    }
    let transfer = decode_transfer(message.payload.as_slice())?;

    let local_token = TOKEN_MAPPINGS
        .may_load(deps.storage, (message.source_chain, transfer.asset.as_str()))?
        .ok_or_else(|| ContractError::UnmappedToken {
            source_chain: message.source_chain,
            remote_token: transfer.asset.clone(),
        })?;

    let entry = LedgerEntry {
        local_token,
        recipient: transfer.recipient,
        amount: transfer.amount,
        nonce: message.nonce,
        applied_at_height: env.block.height,
        relayer: info.sender,
    };
    let balance = record_and_credit(deps.storage, ledger_key, &entry)?;

    Ok(Response::new()
        .add_attribute("method", "relay_message")
        .add_attribute("source_chain", message.source_chain.to_string())
        .add_attribute("sender", sender.as_str())
        .add_attribute("sequence", message.sequence.to_string())
        .add_attribute("nonce", message.nonce.to_string())
        .add_attribute("local_token", entry.local_token)
        .add_attribute("recipient", entry.recipient)
        .add_attribute("amount", entry.amount.to_string())
        .add_attribute("balance", balance.to_string()))
}

/// The only writer of `LEDGER`. Returns the recipient's new balance.
fn record_and_credit(
    storage: &mut dyn Storage,
    key: (u64, &str, u64),
    entry: &LedgerEntry,
) -> Result<Uint128, ContractError> {
    LEDGER.save(storage, key, entry)?;

    let balance = BALANCES.update(
        storage,
        (entry.local_token.as_str(), entry.recipient.as_str()),
        |balance| -> StdResult<_> { Ok(balance.unwrap_or_default().checked_add(entry.amount)?) },
    )?;

    STATS.update(storage, |mut stats| -> StdResult<_> {
        stats.applied_count += 1;
        Ok(stats)
    })?;

    Ok(balance)
}
