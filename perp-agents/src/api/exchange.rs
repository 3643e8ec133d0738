use crate::models::{f64_str, opt_f64_str};
use anyhow::{Context, Result};
use common::AgentError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

const RATE_LIMIT_DELAY: u64 = 10; // Delay in seconds when rate limited
const REQUEST_TIMEOUT: u64 = 30;

/// Per-asset listing metadata from the venue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub max_leverage: u32,
    pub sz_decimals: u32,
}

/// Rolling market state for one asset. The wire writes every number as a
/// string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Absent while a market is halted.
    #[serde(default, deserialize_with = "opt_f64_str")]
    pub mid_px: Option<f64>,
    #[serde(deserialize_with = "f64_str")]
    pub day_ntl_vlm: f64,
    #[serde(deserialize_with = "f64_str")]
    pub funding: f64,
}

/// The paired listing and market-state arrays. Element `j` of `contexts`
/// describes element `j` of `assets`.
#[derive(Debug, Clone)]
pub struct PerpMetadata {
    pub assets: Vec<AssetMeta>,
    pub contexts: Vec<AssetCtx>,
}

impl PerpMetadata {
    /// Assets in listing order, metadata and market state side by side.
    pub fn iter(&self) -> impl Iterator<Item = (&AssetMeta, &AssetCtx)> {
        self.assets.iter().zip(self.contexts.iter())
    }

    pub fn find(&self, coin: &str) -> Option<(&AssetMeta, &AssetCtx)> {
        self.iter().find(|(asset, _)| asset.name == coin)
    }

    pub fn mid_price(&self, coin: &str) -> Option<f64> {
        self.find(coin).and_then(|(_, ctx)| ctx.mid_px)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candle {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o", deserialize_with = "f64_str")]
    pub open: f64,
    #[serde(rename = "h", deserialize_with = "f64_str")]
    pub high: f64,
    #[serde(rename = "l", deserialize_with = "f64_str")]
    pub low: f64,
    #[serde(rename = "c", deserialize_with = "f64_str")]
    pub close: f64,
    #[serde(rename = "v", deserialize_with = "f64_str")]
    pub volume: f64,
}

/// Render candles the way the prompts consume them, one `o,h,l,c,v` row per
/// candle under a header line.
pub fn candles_to_table(candles: &[Candle]) -> String {
    let mut lines = vec!["open,high,low,close,volume".to_string()];
    for candle in candles {
        lines.push(format!(
            "{},{},{},{},{}",
            candle.open, candle.high, candle.low, candle.close, candle.volume
        ));
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Deserialize)]
struct UniverseEnvelope {
    universe: Vec<AssetMeta>,
}

/// Unauthenticated info-endpoint client. Malformed payloads fail closed as
/// parse errors rather than dissolving into defaults.
pub struct ExchangeInfoClient {
    client: Client,
    info_url: String,
}

impl ExchangeInfoClient {
    pub fn new(info_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT))
                .user_agent("perp-agents/0.1")
                .build()?,
            info_url: info_url.into(),
        })
    }

    async fn post_info(&self, body: Value) -> Result<Value> {
        let mut response = self
            .client
            .post(&self.info_url)
            .json(&body)
            .send()
            .await
            .context("Failed to send info request")?;

        // Handle rate limiting
        while response.status() == 429 {
            println!(
                "⚠️ Rate limited by info endpoint, waiting {} seconds...",
                RATE_LIMIT_DELAY
            );
            tokio::time::sleep(Duration::from_secs(RATE_LIMIT_DELAY)).await;
            response = self
                .client
                .post(&self.info_url)
                .json(&body)
                .send()
                .await
                .context("Failed to send info request after rate limit")?;
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::ExternalApiError(format!(
                "Info endpoint error: {} - {}",
                status, error_text
            ))
            .into());
        }

        let text = response
            .text()
            .await
            .context("Failed to get info response text")?;
        if text.trim().is_empty() {
            return Err(
                AgentError::ExternalApiError("Empty response from info endpoint".to_string())
                    .into(),
            );
        }

        serde_json::from_str(&text).context("Failed to parse info response as JSON")
    }

    /// Listing metadata and market state for every perp market.
    pub async fn perp_metadata(&self) -> Result<PerpMetadata> {
        let value = self.post_info(json!({ "type": "metaAndAssetCtxs" })).await?;
        let (envelope, contexts): (UniverseEnvelope, Vec<AssetCtx>) =
            serde_json::from_value(value).map_err(|e| {
                AgentError::ParseError(format!("Malformed metaAndAssetCtxs payload: {}", e))
            })?;
        if envelope.universe.len() != contexts.len() {
            return Err(AgentError::ParseError(
                "metaAndAssetCtxs universe and context arrays differ in length".to_string(),
            )
            .into());
        }
        Ok(PerpMetadata {
            assets: envelope.universe,
            contexts,
        })
    }

    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let value = self
            .post_info(json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": coin,
                    "interval": interval,
                    "startTime": start_ms,
                    "endTime": end_ms,
                }
            }))
            .await?;
        serde_json::from_value(value).map_err(|e| {
            AgentError::ParseError(format!("Malformed candleSnapshot payload: {}", e)).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_arrays_parse_from_the_paired_payload() {
        let payload = r#"[
            {"universe": [
                {"name": "BTC", "maxLeverage": 50, "szDecimals": 5},
                {"name": "UNI", "maxLeverage": 10, "szDecimals": 1}
            ]},
            [
                {"midPx": "61000.5", "dayNtlVlm": "1250000.0", "funding": "0.0000125"},
                {"dayNtlVlm": "50000", "funding": "-0.0005"}
            ]
        ]"#;
        let (envelope, contexts): (UniverseEnvelope, Vec<AssetCtx>) =
            serde_json::from_str(payload).unwrap();
        let meta = PerpMetadata {
            assets: envelope.universe,
            contexts,
        };

        assert_eq!(meta.assets.len(), 2);
        assert_eq!(meta.mid_price("BTC"), Some(61000.5));
        assert_eq!(meta.mid_price("UNI"), None);
        let (asset, ctx) = meta.find("UNI").unwrap();
        assert_eq!(asset.sz_decimals, 1);
        assert_eq!(ctx.funding, -0.0005);
    }

    #[test]
    fn candles_render_as_a_table() {
        let raw = r#"[
            {"t": 1700000000000, "o": "100.0", "h": "110.5", "l": "99.0", "c": "108.2", "v": "1234.5"},
            {"t": 1700000900000, "o": "108.2", "h": "112.0", "l": "107.0", "c": "111.0", "v": "987.1"}
        ]"#;
        let candles: Vec<Candle> = serde_json::from_str(raw).unwrap();
        let table = candles_to_table(&candles);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "open,high,low,close,volume");
        assert_eq!(lines[1], "100,110.5,99,108.2,1234.5");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn malformed_numeric_strings_fail_closed() {
        let raw = r#"{"midPx": "fast", "dayNtlVlm": "1", "funding": "0"}"#;
        assert!(serde_json::from_str::<AssetCtx>(raw).is_err());
    }

    #[test]
    fn numbers_are_accepted_alongside_numeric_strings() {
        let raw = r#"{"midPx": 3300.25, "dayNtlVlm": 50000, "funding": "-0.0005"}"#;
        let ctx: AssetCtx = serde_json::from_str(raw).unwrap();
        assert_eq!(ctx.mid_px, Some(3300.25));
        assert_eq!(ctx.day_ntl_vlm, 50000.0);
    }
}
