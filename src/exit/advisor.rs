//! Advisory momentum check backed by an external inference service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::AdvisorCredentials;

/// How urgently the advisor wants out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitUrgency {
    High,
    Medium,
    #[default]
    Low,
}

/// Advisor verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub sell: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub urgency: ExitUrgency,
}

/// Position and live market metrics handed to the advisor.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryInput {
    pub asset_id: String,
    pub buy_price: f64,
    pub current_price: f64,
    pub pnl_percent: f64,
    pub hold_hours: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub change_1h: f64,
    pub change_24h: f64,
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor not configured")]
    Unconfigured,

    #[error("advisor request failed: {0}")]
    Request(String),

    #[error("unparseable advisor reply: {0}")]
    Parse(String),
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn evaluate(&self, input: &AdvisoryInput) -> Result<Advice, AdvisorError>;
}

/// Deterministic rule used whenever the advisor fails.
pub fn fallback_advice(pnl_percent: f64, change_1h: f64) -> Advice {
    if pnl_percent <= -15.0 {
        return Advice {
            sell: true,
            reason: "stop loss (fallback)".to_string(),
            urgency: ExitUrgency::High,
        };
    }
    if pnl_percent >= 50.0 && change_1h < -5.0 {
        return Advice {
            sell: true,
            reason: "taking profits, momentum fading (fallback)".to_string(),
            urgency: ExitUrgency::Medium,
        };
    }
    Advice {
        sell: false,
        reason: "holding (fallback)".to_string(),
        urgency: ExitUrgency::Low,
    }
}

/// Advisor used when no credentials are configured.
#[derive(Debug, Default)]
pub struct NoopAdvisor;

#[async_trait]
impl Advisor for NoopAdvisor {
    async fn evaluate(&self, _input: &AdvisoryInput) -> Result<Advice, AdvisorError> {
        Err(AdvisorError::Unconfigured)
    }
}

/// Messages-API style HTTP advisor.
pub struct HttpAdvisor {
    http: Client,
    creds: AdvisorCredentials,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl HttpAdvisor {
    pub fn new(creds: AdvisorCredentials) -> Result<Self, AdvisorError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdvisorError::Request(e.to_string()))?;
        Ok(Self { http, creds })
    }
}

fn build_prompt(input: &AdvisoryInput) -> String {
    format!(
        r#"You manage a speculative token position. Decide whether to SELL or HOLD.

POSITION:
- Asset: {asset}
- Buy price: ${buy:.8}
- Current price: ${current:.8}
- P&L: {pnl:+.1}%
- Time held: {hold:.1}h

CURRENT METRICS:
- 24h volume: ${volume:.0}
- Liquidity: ${liquidity:.0}
- 1h price change: {c1h:+.1}%
- 24h price change: {c24h:+.1}%

GUIDELINES:
- Losing with negative momentum: SELL.
- Losing but momentum recovering: HOLD.
- Profitable with strong momentum: HOLD.
- Profitable with fading momentum, or liquidity draining fast: SELL.
- Up 50% or more with weakening momentum: SELL.

Reply with JSON only:
{{"sell": true/false, "reason": "brief explanation", "urgency": "high/medium/low"}}"#,
        asset = input.asset_id,
        buy = input.buy_price,
        current = input.current_price,
        pnl = input.pnl_percent,
        hold = input.hold_hours,
        volume = input.volume_24h,
        liquidity = input.liquidity,
        c1h = input.change_1h,
        c24h = input.change_24h,
    )
}

/// Extract the outermost JSON object from free-form text.
fn parse_advice(text: &str) -> Result<Advice, AdvisorError> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            serde_json::from_str(&text[s..=e]).map_err(|err| AdvisorError::Parse(err.to_string()))
        }
        _ => Err(AdvisorError::Parse("no JSON object in reply".to_string())),
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn evaluate(&self, input: &AdvisoryInput) -> Result<Advice, AdvisorError> {
        let body = json!({
            "model": self.creds.model,
            "max_tokens": 200,
            "messages": [{ "role": "user", "content": build_prompt(input) }],
        });

        let resp = self
            .http
            .post(&self.creds.url)
            .header("x-api-key", &self.creds.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AdvisorError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AdvisorError::Request(format!("{} - {}", status, text)));
        }

        let reply: MessagesResponse = resp.json().await.map_err(|e| AdvisorError::Parse(e.to_string()))?;
        let text = reply.content.first().map(|c| c.text.as_str()).unwrap_or_default();
        let advice = parse_advice(text)?;
        debug!(asset = %input.asset_id, sell = advice.sell, reason = %advice.reason, "Advisor verdict");
        Ok(advice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_rule() {
        assert!(fallback_advice(-16.0, 2.0).sell);
        assert_eq!(fallback_advice(-15.0, 0.0).urgency, ExitUrgency::High);
        assert!(fallback_advice(60.0, -6.0).sell);
        assert!(!fallback_advice(60.0, -2.0).sell);
        assert!(!fallback_advice(5.0, -20.0).sell);
    }

    #[test]
    fn test_parse_advice_from_prose() {
        let advice = parse_advice(
            "Momentum is fading.\n{\"sell\": true, \"reason\": \"volume collapsing\", \"urgency\": \"medium\"}\nDone.",
        )
        .unwrap();
        assert!(advice.sell);
        assert_eq!(advice.urgency, ExitUrgency::Medium);

        let advice = parse_advice(r#"{"sell": false}"#).unwrap();
        assert_eq!(advice.urgency, ExitUrgency::Low);

        assert!(parse_advice("I would hold.").is_err());
        assert!(parse_advice("{not json}").is_err());
    }

    #[tokio::test]
    async fn test_noop_advisor_is_unconfigured() {
        let input = AdvisoryInput {
            asset_id: "FOO".into(),
            buy_price: 1.0,
            current_price: 1.0,
            pnl_percent: 0.0,
            hold_hours: 1.0,
            volume_24h: 0.0,
            liquidity: 0.0,
            change_1h: 0.0,
            change_24h: 0.0,
        };
        assert!(matches!(NoopAdvisor.evaluate(&input).await, Err(AdvisorError::Unconfigured)));
    }
}
