use common::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directional view a research pass settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketBias {
    Long,
    Short,
}

impl fmt::Display for MarketBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketBias::Long => write!(f, "long"),
            MarketBias::Short => write!(f, "short"),
        }
    }
}

impl FromStr for MarketBias {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(MarketBias::Long),
            "short" => Ok(MarketBias::Short),
            other => Err(ParseError::Invalid {
                tag: "market_bias".to_string(),
                detail: format!("expected long or short, got '{}'", other),
            }),
        }
    }
}

/// Order side as the venue reports it. Raw feeds abbreviate buy as `B` and
/// sell as `A`, so both spellings deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "B")]
    Buy,
    #[serde(alias = "A")]
    Sell,
}

/// Which leg of a bracket placement a ledger entry belongs to. The labels
/// are stored verbatim in the ledger files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    #[serde(rename = "main")]
    Main,
    #[serde(rename = "Take Profit")]
    TakeProfit,
    #[serde(rename = "Stop Loss")]
    StopLoss,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Main => write!(f, "main"),
            OrderKind::TakeProfit => write!(f, "Take Profit"),
            OrderKind::StopLoss => write!(f, "Stop Loss"),
        }
    }
}

/// A coin a research pass singled out, with the price seen at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedCoin {
    pub coin: String,
    pub price: f64,
    pub analysis: String,
}

/// One persisted research pass over a sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSnapshot {
    /// Millisecond timestamp of the run that produced the snapshot.
    pub run_id: i64,
    pub market_bias: MarketBias,
    pub market_bias_reason: String,
    pub identified_coins: Vec<IdentifiedCoin>,
}

/// A sector the model chose to research this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorPick {
    pub name: String,
    pub reasons: String,
}

/// Position direction as the trading tools speak it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Bracket-order request as emitted by the trading tool protocol. Models
/// write numbers as strings as often as not, so numeric fields accept both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub coin: String,
    pub side: PositionSide,
    #[serde(deserialize_with = "u32_str")]
    pub leverage: u32,
    #[serde(deserialize_with = "f64_str")]
    pub entry: f64,
    #[serde(deserialize_with = "f64_str")]
    pub take_profit: f64,
    #[serde(deserialize_with = "f64_str")]
    pub stop_loss: f64,
    #[serde(deserialize_with = "f64_str")]
    pub size: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClosePositionRequest {
    pub coin: String,
    #[serde(default)]
    pub reason: String,
}

/// An order in the account's history together with its current status.
/// Trigger legs carry `trigger_px` and `reduce_only`; plain entries leave
/// the trigger at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalOrderEvent {
    pub order: HistoricalOrder,
    pub status: String,
    #[serde(default)]
    pub status_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalOrder {
    pub coin: String,
    pub side: Side,
    #[serde(default, deserialize_with = "f64_str")]
    pub trigger_px: f64,
    #[serde(deserialize_with = "f64_str")]
    pub sz: f64,
    #[serde(default)]
    pub reduce_only: bool,
    pub oid: u64,
    #[serde(default)]
    pub timestamp: i64,
}

// Venue feeds share the habit: numbers arrive as strings as often as not.
// These parsers accept either spelling and reject everything else.

pub(crate) fn f64_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::custom(format!("not a finite number: {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::custom(format!("not a number: '{}'", s))),
        other => Err(Error::custom(format!("expected number, got {}", other))),
    }
}

pub(crate) fn opt_f64_str<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64()),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::custom(format!("not a number: '{}'", s))),
        other => Err(Error::custom(format!("expected number, got {}", other))),
    }
}

pub(crate) fn u32_str<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = f64_str(deserializer)?;
    if value < 0.0 {
        return Err(Error::custom(format!(
            "expected a non-negative integer, got {}",
            value
        )));
    }
    Ok(value as u32)
}
