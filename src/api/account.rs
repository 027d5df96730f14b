//! Wallet balance providers.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;

use super::{parse_price, AccountProvider, DATA_TIMEOUT};
use crate::execution::{Direction, USDC_MINT};
use crate::risk::Balances;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Reads SOL and USDC balances for a wallet over Solana JSON-RPC.
pub struct SolanaRpcAccount {
    client: Client,
    rpc_url: String,
    wallet_address: String,
}

impl SolanaRpcAccount {
    pub fn new(rpc_url: impl Into<String>, wallet_address: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DATA_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            wallet_address: wallet_address.into(),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("RPC {} failed", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("RPC {} failed: {} - {}", method, status, body);
        }

        let data: Value = response.json().await.context("Failed to parse RPC response")?;
        if let Some(err) = data.get("error") {
            return Err(anyhow!("RPC {} error: {}", method, err));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Sum of `uiAmountString` across parsed token accounts.
fn sum_token_accounts(result: &Value) -> Decimal {
    result["value"]
        .as_array()
        .map(|accounts| {
            accounts
                .iter()
                .filter_map(|a| a["account"]["data"]["parsed"]["info"]["tokenAmount"]["uiAmountString"].as_str())
                .map(parse_price)
                .sum()
        })
        .unwrap_or_default()
}

#[async_trait]
impl AccountProvider for SolanaRpcAccount {
    async fn get_balances(&self) -> Result<Balances> {
        let lamports = self.rpc("getBalance", json!([self.wallet_address])).await?;
        let reserve = lamports["value"].as_u64().unwrap_or(0) as f64 / LAMPORTS_PER_SOL;

        let usdc = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([self.wallet_address, { "mint": USDC_MINT }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        let stable = sum_token_accounts(&usdc);

        debug!(sol = reserve, usdc = %stable, "Fetched balances");
        Ok(Balances { reserve, stable })
    }
}

/// Simulated wallet for paper trading. Fills move the stable balance.
pub struct PaperAccount {
    balances: Mutex<Balances>,
}

impl PaperAccount {
    /// Reserve is fixed at 1 SOL so the gas floor never trips in paper mode.
    pub fn new(starting_usd: Decimal) -> Self {
        Self {
            balances: Mutex::new(Balances {
                reserve: 1.0,
                stable: starting_usd,
            }),
        }
    }
}

#[async_trait]
impl AccountProvider for PaperAccount {
    async fn get_balances(&self) -> Result<Balances> {
        Ok(self.balances.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn record_fill(&self, direction: Direction, notional_usd: Decimal) {
        let mut balances = self.balances.lock().unwrap_or_else(|p| p.into_inner());
        match direction {
            Direction::Buy => balances.stable = (balances.stable - notional_usd).max(Decimal::ZERO),
            Direction::Sell => balances.stable += notional_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    #[test]
    fn test_sum_token_accounts() {
        let result = json!({
            "value": [
                {"account": {"data": {"parsed": {"info": {"tokenAmount": {"uiAmountString": "120.5"}}}}}},
                {"account": {"data": {"parsed": {"info": {"tokenAmount": {"uiAmountString": "0.25"}}}}}}
            ]
        });
        assert_eq!(sum_token_accounts(&result), dec!(120.75));
        assert_eq!(sum_token_accounts(&json!(null)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_paper_account_tracks_fills() {
        let account = PaperAccount::new(dec!(500));
        account.record_fill(Direction::Buy, dec!(150)).await;
        assert_eq!(assert_ok!(account.get_balances().await).stable, dec!(350));

        account.record_fill(Direction::Sell, dec!(172.5)).await;
        let balances = assert_ok!(account.get_balances().await);
        assert_eq!(balances.stable, dec!(522.5));
        assert_eq!(balances.reserve, 1.0);
    }
}
