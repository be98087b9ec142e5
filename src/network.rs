//! Network submission for session-key signed transactions
//!
//! `TransactionSender` is the seam the execution strategy uses to broadcast a
//! transaction signed by a session key. `RpcTransactionSender` resolves the
//! missing fields (nonce, fees, gas) over Ethereum JSON-RPC, signs an
//! EIP-1559 transaction and submits it with `eth_sendRawTransaction`.

use crate::config::NetworkConfig;
use crate::error::{AgentBusError, Result};
use crate::evm::{self, Eip1559Transaction};
use crate::session::SessionKeyData;
use crate::types::UnsignedTransaction;
use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Broadcasts a transaction signed by a session key
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Sign `tx` with the session's key and submit it, returning the hash
    async fn send_transaction(
        &self,
        session: &SessionKeyData,
        tx: &UnsignedTransaction,
    ) -> Result<String>;

    /// Whether transactions on `chain_id` can be submitted at all
    fn supports_chain(&self, _chain_id: u64) -> bool {
        true
    }
}

/// Minimal Ethereum JSON-RPC client
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| AgentBusError::Config(format!("invalid RPC URL '{}': {}", url, e)))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, http })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentBusError::Rpc {
                method: method.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let value: Value = response.json().await?;
        if let Some(error) = value.get("error") {
            return Err(AgentBusError::Rpc {
                method: method.to_string(),
                reason: error.to_string(),
            });
        }
        value
            .get("result")
            .cloned()
            .ok_or_else(|| AgentBusError::Rpc {
                method: method.to_string(),
                reason: "result was missing".to_string(),
            })
    }

    async fn call_str(&self, method: &str, params: Value) -> Result<String> {
        let result = self.call(method, params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentBusError::Rpc {
                method: method.to_string(),
                reason: format!("expected a string result, got {}", result),
            })
    }

    /// `eth_getTransactionCount(address, "pending")`
    pub async fn transaction_count(&self, address: &str) -> Result<u64> {
        let raw = self
            .call_str("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        evm::parse_u64_quantity(&raw, "eth_getTransactionCount")
    }

    pub async fn gas_price(&self) -> Result<U256> {
        let raw = self.call_str("eth_gasPrice", json!([])).await?;
        evm::parse_quantity(&raw, "eth_gasPrice")
    }

    pub async fn estimate_gas(&self, from: &str, tx: &UnsignedTransaction) -> Result<u64> {
        let value = evm::parse_quantity(&tx.value, "value")?;
        let raw = self
            .call_str(
                "eth_estimateGas",
                json!([{
                    "from": from,
                    "to": tx.to,
                    "value": format!("0x{:x}", value),
                    "data": tx.data,
                }]),
            )
            .await?;
        evm::parse_u64_quantity(&raw, "eth_estimateGas")
    }

    /// Submit a signed 0x-hex transaction, returning the node's hash
    pub async fn send_raw_transaction(&self, raw_tx: &str) -> Result<String> {
        self.call_str("eth_sendRawTransaction", json!([raw_tx]))
            .await
            .map(|hash| hash.to_lowercase())
    }
}

/// JSON-RPC backed sender with one client per configured chain
#[derive(Debug, Clone)]
pub struct RpcTransactionSender {
    clients: HashMap<u64, JsonRpcClient>,
    priority_fee_wei: U256,
    fallback_gas_limit: u64,
}

impl RpcTransactionSender {
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let mut clients = HashMap::with_capacity(config.rpc_urls.len());
        for (chain_id, url) in &config.rpc_urls {
            clients.insert(
                *chain_id,
                JsonRpcClient::new(url.clone(), config.request_timeout())?,
            );
        }
        Ok(Self {
            clients,
            priority_fee_wei: U256::from(config.priority_fee_wei),
            fallback_gas_limit: config.fallback_gas_limit,
        })
    }

    fn client(&self, chain_id: u64) -> Result<&JsonRpcClient> {
        self.clients.get(&chain_id).ok_or_else(|| {
            AgentBusError::Config(format!("no RPC URL configured for chain {}", chain_id))
        })
    }

    async fn resolve(
        &self,
        client: &JsonRpcClient,
        sender: &str,
        tx: &UnsignedTransaction,
    ) -> Result<Eip1559Transaction> {
        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => client.transaction_count(sender).await?,
        };

        let gas_limit = match tx.gas.as_deref() {
            Some(gas) => evm::parse_u64_quantity(gas, "gas")?,
            None => match client.estimate_gas(sender, tx).await {
                Ok(estimate) => estimate,
                Err(e) => {
                    tracing::warn!(
                        chain_id = tx.chain_id,
                        fallback = self.fallback_gas_limit,
                        "Gas estimation failed, using fallback limit: {}",
                        e
                    );
                    self.fallback_gas_limit
                }
            },
        };

        let max_priority_fee_per_gas = match tx.max_priority_fee_per_gas.as_deref() {
            Some(fee) => evm::parse_quantity(fee, "maxPriorityFeePerGas")?,
            None => self.priority_fee_wei,
        };
        let max_fee_per_gas = match tx.max_fee_per_gas.as_deref() {
            Some(fee) => evm::parse_quantity(fee, "maxFeePerGas")?,
            None => {
                let gas_price = client.gas_price().await?;
                default_max_fee(gas_price, max_priority_fee_per_gas)
            }
        };

        Ok(Eip1559Transaction {
            chain_id: tx.chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to: evm::parse_address(&tx.to)?,
            value: evm::parse_quantity(&tx.value, "value")?,
            data: evm::parse_call_data(&tx.data)?,
        })
    }
}

/// Twice the current gas price plus the tip, leaving room for base-fee growth
fn default_max_fee(gas_price: U256, priority_fee: U256) -> U256 {
    gas_price
        .saturating_mul(U256::from(2u8))
        .saturating_add(priority_fee)
}

#[async_trait]
impl TransactionSender for RpcTransactionSender {
    async fn send_transaction(
        &self,
        session: &SessionKeyData,
        tx: &UnsignedTransaction,
    ) -> Result<String> {
        let client = self.client(tx.chain_id)?;
        let key = session.signing_key()?;
        let unsigned = self.resolve(client, &session.address, tx).await?;
        let signed = unsigned.sign(&key)?;

        let hash = client.send_raw_transaction(&signed.raw_hex()).await?;
        if hash != signed.hash_hex() {
            tracing::warn!(
                expected = %signed.hash_hex(),
                returned = %hash,
                "Node returned a different transaction hash"
            );
        }

        tracing::info!(
            chain_id = tx.chain_id,
            signer = %session.address,
            nonce = unsigned.nonce,
            hash = %hash,
            "Session key transaction submitted"
        );
        Ok(hash)
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.clients.contains_key(&chain_id)
    }
}
