//! Cosmos LCD client for the destination chain
//!
//! Signs `MsgExecuteContract` transactions with cosmrs, broadcasts them over
//! the LCD REST API and reads back tx results and smart queries.

use std::time::Duration;

use base64::Engine;
use bip39::Mnemonic;
use cosmrs::{
    bip32::DerivationPath,
    crypto::secp256k1::SigningKey,
    tx::{self, Fee, Msg, SignDoc, SignerInfo},
    AccountId, Coin,
};
use eyre::{eyre, Result, WrapErr};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DestinationConfig;

/// Terra derivation path (coin type 330)
const DERIVATION_PATH: &str = "m/44'/330'/0'/0/0";

/// CheckTx code for a wrong account sequence
const CODE_WRONG_SEQUENCE: u32 = 32;

/// Re-signs allowed after a sequence mismatch within one broadcast
const MAX_SEQUENCE_RESIGNS: u32 = 3;

/// Account info from LCD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
    pub sequence: u64,
    pub account_number: u64,
}

/// CheckTx result of a sync broadcast
#[derive(Debug, Clone)]
pub struct BroadcastResult {
    pub txhash: String,
    /// Zero when the transaction entered the mempool
    pub code: u32,
    pub raw_log: String,
}

/// Result of an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub txhash: String,
    pub height: u64,
    pub code: u32,
    pub raw_log: String,
}

/// Signing sequence carried across broadcasts from one account.
///
/// The LCD only reports the committed sequence, so transactions still in the
/// mempool are counted here.
#[derive(Debug, Default)]
struct SequenceCache {
    account: Option<AccountInfo>,
}

impl SequenceCache {
    /// Update after a broadcast. Returns true when the transaction should be
    /// signed again with the corrected sequence.
    fn record(&mut self, result: &BroadcastResult) -> bool {
        let Some(account) = self.account.as_mut() else {
            return false;
        };
        if result.code == 0 {
            account.sequence += 1;
            return false;
        }
        if !is_sequence_mismatch(result.code, &result.raw_log) {
            // A CheckTx failure does not consume the sequence
            return false;
        }
        match expected_sequence(&result.raw_log) {
            Some(expected) => account.sequence = expected,
            None => self.account = None,
        }
        true
    }

    fn invalidate(&mut self) {
        self.account = None;
    }
}

#[derive(Deserialize)]
struct TxResponseEnvelope {
    tx_response: RawTxResponse,
}

#[derive(Deserialize)]
struct RawTxResponse {
    txhash: String,
    #[serde(default)]
    height: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

#[derive(Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

/// Signing client for one destination account
pub struct LcdClient {
    lcd_url: String,
    chain_id: String,
    signing_key: SigningKey,
    pub address: AccountId,
    fee_denom: String,
    gas_limit: u64,
    fee_amount: u128,
    client: Client,
    /// Held across sign and broadcast so concurrent relays never share a sequence
    sequence: Mutex<SequenceCache>,
}

impl LcdClient {
    pub fn new(config: &DestinationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        let mnemonic =
            Mnemonic::parse(config.mnemonic.as_str()).map_err(|e| eyre!("Invalid mnemonic: {}", e))?;

        let seed = mnemonic.to_seed("");
        let path: DerivationPath = DERIVATION_PATH
            .parse()
            .map_err(|e| eyre!("Invalid derivation path: {:?}", e))?;

        let signing_key = SigningKey::derive_from_path(seed, &path)
            .map_err(|e| eyre!("Failed to derive signing key: {}", e))?;

        let address = signing_key
            .public_key()
            .account_id(&config.address_prefix)
            .map_err(|e| eyre!("Failed to get account ID: {}", e))?;

        info!(
            address = %address,
            chain_id = %config.chain_id,
            "LCD client initialized"
        );

        Ok(Self {
            lcd_url: config.lcd_url.trim_end_matches('/').to_string(),
            chain_id: config.chain_id.clone(),
            signing_key,
            address,
            fee_denom: config.fee_denom.clone(),
            gas_limit: config.gas_limit,
            fee_amount: config.fee_amount(),
            client,
            sequence: Mutex::new(SequenceCache::default()),
        })
    }

    /// Get account info (sequence and account number)
    pub async fn get_account_info(&self) -> Result<AccountInfo> {
        let url = format!(
            "{}/cosmos/auth/v1beta1/accounts/{}",
            self.lcd_url, self.address
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query account info")?;

        if !response.status().is_success() {
            return Err(eyre!(
                "Account query failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let data: serde_json::Value = response.json().await?;
        parse_account_info(&data)
    }

    /// Sign and broadcast a CosmWasm execute message, re-signing on a
    /// sequence mismatch
    pub async fn execute_contract(
        &self,
        contract_address: &str,
        msg: &impl Serialize,
    ) -> Result<BroadcastResult> {
        let mut cache = self.sequence.lock().await;
        let mut resigns = 0;

        loop {
            let account_info = match cache.account {
                Some(account) => account,
                None => {
                    let account = self.get_account_info().await?;
                    cache.account = Some(account);
                    account
                }
            };

            debug!(
                sequence = account_info.sequence,
                account_number = account_info.account_number,
                "Signing destination transaction"
            );

            let tx_bytes = self.sign_execute(contract_address, msg, &account_info)?;
            let result = match self.broadcast_tx(&tx_bytes).await {
                Ok(result) => result,
                Err(e) => {
                    // Unknown whether the sequence was consumed
                    cache.invalidate();
                    return Err(e);
                }
            };

            if !cache.record(&result) || resigns >= MAX_SEQUENCE_RESIGNS {
                return Ok(result);
            }
            resigns += 1;
            warn!(
                attempt = resigns,
                raw_log = %result.raw_log,
                "Sequence mismatch, re-signing transaction"
            );
        }
    }

    fn sign_execute(
        &self,
        contract_address: &str,
        msg: &impl Serialize,
        account_info: &AccountInfo,
    ) -> Result<Vec<u8>> {
        let execute_msg = cosmrs::cosmwasm::MsgExecuteContract {
            sender: self.address.clone(),
            contract: contract_address
                .parse()
                .map_err(|e| eyre!("Invalid contract address: {:?}", e))?,
            msg: serde_json::to_vec(msg)?,
            funds: vec![],
        };

        let body = tx::Body::new(
            vec![execute_msg
                .to_any()
                .map_err(|e| eyre!("Failed to convert message: {}", e))?],
            "",
            0u32,
        );

        let signer_info =
            SignerInfo::single_direct(Some(self.signing_key.public_key()), account_info.sequence);

        let fee = Fee::from_amount_and_gas(
            Coin {
                denom: self
                    .fee_denom
                    .parse()
                    .map_err(|e| eyre!("Invalid fee denom {}: {}", self.fee_denom, e))?,
                amount: self.fee_amount,
            },
            self.gas_limit,
        );

        let auth_info = signer_info.auth_info(fee);

        let chain_id = self
            .chain_id
            .parse()
            .map_err(|_| eyre!("Invalid chain ID"))?;

        let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, account_info.account_number)
            .map_err(|e| eyre!("Failed to create sign doc: {}", e))?;

        let tx_raw = sign_doc
            .sign(&self.signing_key)
            .map_err(|e| eyre!("Failed to sign transaction: {}", e))?;

        tx_raw
            .to_bytes()
            .map_err(|e| eyre!("Failed to serialize transaction: {}", e))
    }

    /// Broadcast a signed transaction in sync mode
    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<BroadcastResult> {
        let broadcast_url = format!("{}/cosmos/tx/v1beta1/txs", self.lcd_url);
        let request = serde_json::json!({
            "tx_bytes": base64::engine::general_purpose::STANDARD.encode(tx_bytes),
            "mode": "BROADCAST_MODE_SYNC"
        });

        debug!(url = %broadcast_url, "Broadcasting transaction");

        let response = self
            .client
            .post(&broadcast_url)
            .json(&request)
            .send()
            .await
            .wrap_err("Network error broadcasting transaction")?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .wrap_err("Failed to parse broadcast response")?;

        if !status.is_success() {
            return Err(eyre!("Broadcast failed ({}): {}", status, body));
        }

        let parsed: TxResponseEnvelope = serde_json::from_value(body.clone())
            .map_err(|e| eyre!("Unexpected broadcast response {}: {}", body, e))?;

        let result = BroadcastResult {
            txhash: parsed.tx_response.txhash,
            code: parsed.tx_response.code,
            raw_log: parsed.tx_response.raw_log,
        };

        if result.code == 0 {
            info!(txhash = %result.txhash, "Transaction broadcast successful");
        } else {
            debug!(
                txhash = %result.txhash,
                code = result.code,
                raw_log = %result.raw_log,
                "Transaction rejected at broadcast"
            );
        }

        Ok(result)
    }

    /// Look up an included transaction. `None` while it is not yet indexed.
    pub async fn get_tx(&self, txhash: &str) -> Result<Option<TxResult>> {
        let url = format!("{}/cosmos/tx/v1beta1/txs/{}", self.lcd_url, txhash);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query transaction")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(eyre!(
                "Tx query failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let parsed: TxResponseEnvelope = response
            .json()
            .await
            .wrap_err("Failed to parse tx response")?;

        Ok(Some(TxResult {
            height: parsed.tx_response.height.parse().unwrap_or(0),
            txhash: parsed.tx_response.txhash,
            code: parsed.tx_response.code,
            raw_log: parsed.tx_response.raw_log,
        }))
    }

    /// Run a CosmWasm smart query
    pub async fn query_smart<T: DeserializeOwned>(
        &self,
        contract_address: &str,
        query: &impl Serialize,
    ) -> Result<T> {
        let query_b64 = base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(query)?);
        let url = format!(
            "{}/cosmwasm/wasm/v1/contract/{}/smart/{}",
            self.lcd_url, contract_address, query_b64
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query contract")?;

        if !response.status().is_success() {
            return Err(eyre!(
                "Contract query failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let parsed: SmartQueryResponse<T> = response
            .json()
            .await
            .wrap_err("Failed to parse contract query response")?;

        Ok(parsed.data)
    }
}

fn is_sequence_mismatch(code: u32, raw_log: &str) -> bool {
    code == CODE_WRONG_SEQUENCE
        || raw_log.contains("account sequence mismatch")
        || raw_log.contains("incorrect account sequence")
}

/// Sequence the chain asked for, from
/// `account sequence mismatch, expected 6, got 5: incorrect account sequence`
fn expected_sequence(raw_log: &str) -> Option<u64> {
    let rest = &raw_log[raw_log.find("expected ")? + "expected ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extract sequence and account number, including vesting/base_account layouts
fn parse_account_info(data: &serde_json::Value) -> Result<AccountInfo> {
    let account = data
        .get("account")
        .ok_or_else(|| eyre!("Missing 'account' field in response"))?;

    let field = |name: &str| -> u64 {
        account
            .get(name)
            .or_else(|| account.get("base_account").and_then(|b| b.get(name)))
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .parse()
            .unwrap_or(0)
    };

    Ok(AccountInfo {
        sequence: field("sequence"),
        account_number: field("account_number"),
    })
}
