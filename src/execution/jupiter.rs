//! Live router: Jupiter quotes and swaps, remote signer, Solana RPC broadcast.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Direction, OrderRequest, OrderRouter, Quote, RouteError, UnsignedTx};
use crate::config::LiveCredentials;
use crate::error::{TradeError, TradeResult};

/// USDC mint on Solana
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const USDC_DECIMALS: u32 = 6;

/// Max priority fee per swap
const MAX_PRIORITY_LAMPORTS: u64 = 1_000_000;

/// Response from the remote signer service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_transaction: String,
}

pub struct JupiterRouter {
    http: Client,
    creds: LiveCredentials,
    buy_slippage_bps: u32,
    sell_slippage_bps: u32,
}

impl JupiterRouter {
    pub fn new(creds: LiveCredentials, buy_slippage_bps: u32, sell_slippage_bps: u32) -> TradeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TradeError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            creds,
            buy_slippage_bps,
            sell_slippage_bps,
        })
    }

    /// JSON-RPC call against the Solana node.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RouteError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self.http.post(&self.creds.rpc_url).json(&payload).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RouteError::Http { status, body });
        }

        let data: Value = resp.json().await?;
        if let Some(err) = data.get("error") {
            let message = err.to_string();
            if message.to_lowercase().contains("blockhash") {
                return Err(RouteError::StaleBlockhash(message));
            }
            return Err(RouteError::Rejected(message));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Raw on-chain balance and decimals of `mint` held by the wallet.
    async fn token_balance(&self, mint: &str) -> Result<(u64, u32), RouteError> {
        let result = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([self.creds.wallet_address, { "mint": mint }, { "encoding": "jsonParsed" }]),
            )
            .await?;

        let accounts = result["value"].as_array().cloned().unwrap_or_default();
        let mut total = 0u64;
        let mut decimals = 0u32;
        for account in accounts {
            let amount = &account["account"]["data"]["parsed"]["info"]["tokenAmount"];
            total += amount["amount"].as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
            decimals = amount["decimals"].as_u64().unwrap_or(0) as u32;
        }
        Ok((total, decimals))
    }

    async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, RouteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 400 || status.as_u16() == 404 {
            return Err(RouteError::NoRoute(format!("{} failed: {}", what, truncate(&body, 150))));
        }
        Err(RouteError::Http {
            status: status.as_u16(),
            body: truncate(&body, 150),
        })
    }
}

/// Convert a UI amount to raw integer units.
fn to_raw(amount: Decimal, decimals: u32) -> u64 {
    (amount * Decimal::from(10u64.pow(decimals)))
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl OrderRouter for JupiterRouter {
    fn name(&self) -> &'static str {
        "jupiter"
    }

    fn is_ready(&self) -> bool {
        !self.creds.wallet_address.is_empty() && !self.creds.signer_url.is_empty()
    }

    async fn quote(&self, request: &OrderRequest) -> Result<Quote, RouteError> {
        let (input, output, amount_raw, slippage) = match request.direction {
            Direction::Buy => (
                USDC_MINT.to_string(),
                request.asset_ref.clone(),
                to_raw(request.amount, USDC_DECIMALS),
                self.buy_slippage_bps,
            ),
            Direction::Sell => {
                let (held, decimals) = self.token_balance(&request.asset_ref).await?;
                if held == 0 {
                    return Err(RouteError::NoRoute(format!("zero balance of {}", request.asset_ref)));
                }
                let wanted = to_raw(request.amount, decimals);
                (
                    request.asset_ref.clone(),
                    USDC_MINT.to_string(),
                    wanted.min(held),
                    self.sell_slippage_bps,
                )
            }
        };

        if amount_raw == 0 {
            return Err(RouteError::NoRoute(format!("zero amount for {}", request.asset_ref)));
        }

        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.creds.router_url, input, output, amount_raw, slippage
        );
        let resp = self.http.get(&url).send().await?;
        let resp = Self::check_status(resp, "quote").await?;

        let mut raw: Value = resp.json().await?;
        if let Some(obj) = raw.as_object_mut() {
            obj.remove("platformFee");
        }

        let out_amount = raw["outAmount"].as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        // Reported as a fraction
        let price_impact = raw["priceImpactPct"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
            * 100.0;

        debug!(input = %input, output = %output, in_amount = amount_raw, out_amount = out_amount, "Quote received");

        Ok(Quote {
            input_ref: input,
            output_ref: output,
            in_amount: amount_raw,
            out_amount,
            price_impact_percent: price_impact,
            raw,
        })
    }

    async fn build_transaction(&self, quote: &Quote) -> Result<UnsignedTx, RouteError> {
        let priority = if quote.output_ref == USDC_MINT { "high" } else { "medium" };
        let mut last_err = RouteError::NoRoute("swap build failed".to_string());

        // Shared accounts break some simple AMMs, so try without first
        for use_shared in [false, true] {
            let body = json!({
                "quoteResponse": quote.raw,
                "userPublicKey": self.creds.wallet_address,
                "wrapAndUnwrapSol": true,
                "useSharedAccounts": use_shared,
                "dynamicComputeUnitLimit": true,
                "prioritizationFeeLamports": {
                    "priorityLevelWithMaxLamports": {
                        "maxLamports": MAX_PRIORITY_LAMPORTS,
                        "priorityLevel": priority,
                    }
                }
            });

            let resp = self
                .http
                .post(format!("{}/swap", self.creds.router_url))
                .json(&body)
                .send()
                .await?;

            match Self::check_status(resp, "swap").await {
                Ok(resp) => {
                    let data: Value = resp.json().await?;
                    return data["swapTransaction"]
                        .as_str()
                        .map(|tx| UnsignedTx { payload: tx.to_string() })
                        .ok_or_else(|| RouteError::Rejected("no swap transaction".to_string()));
                }
                Err(e) => {
                    warn!(shared = use_shared, error = %e, "Swap build failed");
                    if e.is_transient() {
                        return Err(e);
                    }
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn submit(&self, tx: &UnsignedTx, idempotency_key: &str) -> Result<String, RouteError> {
        let resp = self
            .http
            .post(&self.creds.signer_url)
            .bearer_auth(&self.creds.signer_api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&json!({
                "address": self.creds.wallet_address,
                "transaction": tx.payload,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                s if s == 429 || s >= 500 => RouteError::Http { status: s, body },
                _ => RouteError::Rejected(format!("signer {}: {}", status, truncate(&body, 150))),
            });
        }
        let signed: SignResponse = resp.json().await?;

        let signature = self
            .rpc(
                "sendTransaction",
                json!([signed.signed_transaction, { "encoding": "base64" }]),
            )
            .await?;

        signature
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| RouteError::Rejected("sendTransaction returned no signature".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_raw_truncates() {
        assert_eq!(to_raw(dec!(150), USDC_DECIMALS), 150_000_000);
        assert_eq!(to_raw(dec!(1.2345678), 6), 1_234_567);
        assert_eq!(to_raw(dec!(-1), 6), 0);
    }

    #[test]
    fn test_ready_requires_wallet() {
        let creds = LiveCredentials {
            router_url: "http://localhost".into(),
            signer_url: "http://localhost/sign".into(),
            signer_api_key: "key".into(),
            wallet_address: String::new(),
            rpc_url: "http://localhost/rpc".into(),
        };
        let router = JupiterRouter::new(creds, 100, 500).unwrap();
        assert!(!router.is_ready());
    }
}
