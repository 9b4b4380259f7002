//! Platform token balances over Ethereum JSON-RPC

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::U256;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::{ChainConfig, MAX_TOKEN_DECIMALS};
use crate::error::{MarketError, Result};

/// ERC-20 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Where token balances come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance of `address` in whole tokens
    async fn token_balance(&self, address: &str) -> Result<i64>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `eth_call balanceOf` against a configured token contract
#[derive(Clone)]
pub struct RpcBalanceClient {
    client: Client,
    rpc_url: String,
    token_contract: String,
    decimals: u32,
    timeout: Duration,
}

impl RpcBalanceClient {
    pub fn new(rpc_url: String, token_contract: String, decimals: u32, timeout_ms: u64) -> Result<Self> {
        if decimals > MAX_TOKEN_DECIMALS {
            return Err(MarketError::Validation(format!(
                "token decimals {} exceed {}",
                decimals, MAX_TOKEN_DECIMALS
            )));
        }
        let timeout = Duration::from_millis(timeout_ms.max(1));
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url,
            token_contract,
            decimals,
            timeout,
        })
    }

    /// None when no RPC endpoint is configured
    pub fn from_config(config: &ChainConfig) -> Result<Option<Self>> {
        match config.rpc_url {
            Some(ref url) => Ok(Some(Self::new(
                url.clone(),
                config.token_contract.clone(),
                config.token_decimals,
                config.timeout_ms,
            )?)),
            None => Ok(None),
        }
    }

    async fn call(&self, address: &str) -> Result<i64> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.token_contract, "data": balance_of_calldata(address)? },
                "latest"
            ]
        });

        let resp: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(MarketError::dependency(
                "chain_rpc",
                format!("{} ({})", err.message, err.code),
            ));
        }
        let raw = resp
            .result
            .ok_or_else(|| MarketError::dependency("chain_rpc", "empty eth_call result"))?;
        whole_tokens(&raw, self.decimals)
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceClient {
    async fn token_balance(&self, address: &str) -> Result<i64> {
        let balance = tokio::time::timeout(self.timeout, self.call(address))
            .await
            .map_err(|_| MarketError::dependency("chain_rpc", "balance lookup timed out"))??;
        debug!(address, balance, "Fetched token balance");
        Ok(balance)
    }
}

/// Balances held in memory; every unknown address holds zero.
/// Serves deployments without a chain endpoint.
#[derive(Default)]
pub struct StaticBalances {
    balances: DashMap<String, i64>,
}

impl StaticBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, balance: i64) {
        self.balances.insert(address.to_lowercase(), balance);
    }
}

#[async_trait]
impl BalanceSource for StaticBalances {
    async fn token_balance(&self, address: &str) -> Result<i64> {
        Ok(self
            .balances
            .get(&address.to_lowercase())
            .map(|b| *b)
            .unwrap_or(0))
    }
}

fn balance_of_calldata(address: &str) -> Result<String> {
    let hex_part = address.trim_start_matches("0x");
    if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
        return Err(MarketError::Validation(format!("bad address: {}", address)));
    }
    Ok(format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, hex_part.to_lowercase()))
}

/// Hex-encoded base units to whole tokens, saturating at i64::MAX
fn whole_tokens(raw: &str, decimals: u32) -> Result<i64> {
    let hex_part = raw.trim().trim_start_matches("0x");
    let units = if hex_part.is_empty() {
        U256::zero()
    } else {
        U256::from_str_radix(hex_part, 16)
            .map_err(|e| MarketError::dependency("chain_rpc", format!("bad balance {:?}: {}", raw, e)))?
    };
    let whole = units / U256::exp10(decimals as usize);
    if whole > U256::from(i64::MAX as u64) {
        Ok(i64::MAX)
    } else {
        Ok(whole.as_u64() as i64)
    }
}
