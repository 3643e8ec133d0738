//! Parsers for the tagged replies the prompts ask for. Parsing fails closed:
//! a malformed section surfaces as a [`ParseError`] instead of
//! partially-coerced data reaching the pipeline.

use common::extract::{self, ParseError};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::{ClosePositionRequest, MarketBias, PlaceOrderRequest, SectorPick};

/// Parsed market belief reply.
#[derive(Debug, Clone)]
pub struct MarketBelief {
    pub direction: MarketBias,
    pub reasons: String,
    /// Days the model expects the belief to hold, kept as the raw text.
    pub applicability_days: String,
}

pub fn parse_belief_reply(reply: &str) -> Result<MarketBelief, ParseError> {
    let text = extract::strip_think_blocks(reply);
    let direction = parse_bias("direction", &extract::extract_required(&text, "direction")?)?;
    Ok(MarketBelief {
        direction,
        reasons: extract::extract_required(&text, "reasons")?,
        applicability_days: extract::extract_required(&text, "applicability")?,
    })
}

/// Sector picks from a `<sectors>` reply. A reply that names no sectors is
/// valid and yields no picks.
pub fn parse_sector_reply(reply: &str) -> Result<Vec<SectorPick>, ParseError> {
    let text = extract::strip_think_blocks(reply);
    let block = extract::extract_required(&text, "sectors")?;
    let mut picks = Vec::new();
    for section in extract::extract_all(&block, "sector") {
        picks.push(SectorPick {
            name: extract::extract_required(&section, "name")?,
            reasons: extract::extract_required(&section, "reasons")?,
        });
    }
    Ok(picks)
}

/// An identified coin as the model writes it. The live price is attached by
/// the caller from the funding rank, not trusted from the reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIdentifiedCoin {
    pub coin: String,
    #[serde(default)]
    pub analysis: String,
}

#[derive(Debug, Clone)]
pub struct ResearchReply {
    pub market_bias: MarketBias,
    pub market_bias_reason: String,
    pub identified_coins: Vec<RawIdentifiedCoin>,
}

/// Parse a sector research reply, keeping at most `limit` coins.
pub fn parse_research_reply(reply: &str, limit: usize) -> Result<ResearchReply, ParseError> {
    let text = extract::strip_think_blocks(reply);
    let bias = parse_bias("market_bias", &extract::extract_required(&text, "market_bias")?)?;
    let coins = parse_json_section::<RawIdentifiedCoin>(
        "identified_coins",
        &extract::extract_required(&text, "identified_coins")?,
    )?;
    Ok(ResearchReply {
        market_bias: bias,
        market_bias_reason: extract::extract_required(&text, "market_bias_reason")?,
        identified_coins: coins.into_iter().take(limit).collect(),
    })
}

/// One tool call lifted out of a trade reply.
#[derive(Debug, Clone)]
pub enum ToolCall {
    PlaceOrders(Vec<PlaceOrderRequest>),
    ClosePositions(Vec<ClosePositionRequest>),
}

/// Every tool call in a trade reply. Sections parse independently, so one
/// malformed block does not cost the others. Close calls are returned before
/// placements, matching the order they execute in.
pub fn parse_tool_calls(reply: &str) -> Vec<Result<ToolCall, ParseError>> {
    let text = extract::strip_think_blocks(reply);
    let mut calls = Vec::new();
    for block in extract::extract_all(&text, "closePositions") {
        calls.push(parse_json_section("closePositions", &block).map(ToolCall::ClosePositions));
    }
    for block in extract::extract_all(&text, "placeOrders") {
        calls.push(parse_json_section("placeOrders", &block).map(ToolCall::PlaceOrders));
    }
    calls
}

fn parse_bias(tag: &str, section: &str) -> Result<MarketBias, ParseError> {
    section.parse().map_err(|_| ParseError::Invalid {
        tag: tag.to_string(),
        detail: format!("expected long or short, got '{}'", section.trim()),
    })
}

/// Parse a tagged JSON section after cleanup. A single object counts as a
/// one-element array.
fn parse_json_section<T: DeserializeOwned>(tag: &str, block: &str) -> Result<Vec<T>, ParseError> {
    let cleaned = extract::clean_json_block(block);
    let value: serde_json::Value =
        serde_json::from_str(&cleaned).map_err(|source| ParseError::InvalidJson {
            tag: tag.to_string(),
            source,
        })?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|source| ParseError::InvalidJson {
                tag: tag.to_string(),
                source,
            })
        })
        .collect()
}
