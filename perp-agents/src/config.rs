use anyhow::{Context, Result};
use common::providers::ModelEndpoint;
use common::JsonStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;

/// Process-wide settings, read once from the environment at startup and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub data_dir: String,
    pub info_url: String,
    pub loop_interval_secs: u64,
    pub completion_retries: u32,
    pub telegram_enabled: bool,
    /// When set, every completion is routed to this endpoint instead of the
    /// per-agent models. Debug aid; applied once while agents are built.
    pub model_override: Option<ModelEndpoint>,
}

impl SystemConfig {
    pub fn from_env() -> Result<Self> {
        let model_override = match env::var("MODEL_OVERRIDE") {
            Ok(raw) => Some(raw.parse().context("Invalid MODEL_OVERRIDE")?),
            Err(_) => None,
        };
        Ok(Self {
            data_dir: env_string("AGENT_DATA_DIR", "data"),
            info_url: env_string("EXCHANGE_INFO_URL", "https://api.hyperliquid.xyz/info"),
            loop_interval_secs: env_u64("LOOP_INTERVAL_SECS", 600)?,
            completion_retries: env_u64("COMPLETION_RETRIES", 1)? as u32,
            telegram_enabled: env_bool("TELEGRAM_ENABLED", false),
            model_override,
        })
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be an integer, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// One agent definition from the agents file. Immutable for the lifetime of
/// the process; run progress lives in [`RunState`].
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_id: String,
    pub persona: String,
    /// Sector names the agent may research, offered to the model each run.
    pub sectors: Vec<String>,
    pub research_model: ModelEndpoint,
    pub trade_model: ModelEndpoint,
    #[serde(default = "default_trade_frequency_ms")]
    pub trade_frequency_ms: i64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    /// Smallest order value, in USD, the agent is told to place.
    #[serde(default = "default_min_order_size")]
    pub min_order_size: f64,
    /// Daily notional volume floor for the funding ranking.
    #[serde(default = "default_min_volume")]
    pub min_volume: f64,
    #[serde(default)]
    pub research_params: ResearchParams,
    #[serde(default)]
    pub trade_params: TradeParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchParams {
    /// Top funding-ranked coins handed to the research prompt.
    #[serde(default = "default_coin_lookup_limit")]
    pub coin_lookup_limit: usize,
    /// Coins the model is asked to single out per sector.
    #[serde(default = "default_identify_coin_limit")]
    pub identify_coin_limit: usize,
    /// Past snapshots examined when checking research freshness.
    #[serde(default = "default_rag_lookup_limit")]
    pub rag_lookup_limit: usize,
}

impl Default for ResearchParams {
    fn default() -> Self {
        Self {
            coin_lookup_limit: default_coin_lookup_limit(),
            identify_coin_limit: default_identify_coin_limit(),
            rag_lookup_limit: default_rag_lookup_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeParams {
    /// Historical trigger matches surfaced to the trade prompt.
    #[serde(default = "default_order_lookup_limit")]
    pub order_lookup_limit: usize,
}

impl Default for TradeParams {
    fn default() -> Self {
        Self {
            order_lookup_limit: default_order_lookup_limit(),
        }
    }
}

fn default_trade_frequency_ms() -> i64 {
    3_600_000
}

fn default_max_leverage() -> u32 {
    3
}

fn default_min_order_size() -> f64 {
    15.0
}

fn default_min_volume() -> f64 {
    10_000.0
}

fn default_coin_lookup_limit() -> usize {
    10
}

fn default_identify_coin_limit() -> usize {
    3
}

fn default_rag_lookup_limit() -> usize {
    5
}

fn default_order_lookup_limit() -> usize {
    5
}

/// Load the agents file: a JSON map of agent id to definition. Map order is
/// normalized so agents always run in id order.
pub fn load_agents(path: &Path) -> Result<Vec<AgentConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agents file {}", path.display()))?;
    let map: BTreeMap<String, AgentConfig> =
        serde_json::from_str(&raw).context("Failed to parse agents file")?;
    Ok(map
        .into_iter()
        .map(|(id, mut config)| {
            config.agent_id = id;
            config
        })
        .collect())
}

/// Mutable run progress, persisted per agent and kept apart from the
/// immutable config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Millisecond id of the last completed run; 0 before the first run.
    pub last_run_id: i64,
}

impl RunState {
    pub async fn load(store: &JsonStore) -> Result<Self> {
        Ok(store.load("state", "run").await?.unwrap_or_default())
    }

    pub async fn save(&self, store: &JsonStore) -> Result<()> {
        store.save("state", "run", self).await
    }

    /// Frequency gate: a run is due once `trade_frequency_ms` has elapsed
    /// since the last recorded run.
    pub fn due(&self, trade_frequency_ms: i64, now_ms: i64) -> bool {
        now_ms - self.last_run_id >= trade_frequency_ms
    }

    /// The only state transition: a completed run moves the cursor to the
    /// id of that run.
    pub fn advance(self, run_id: i64) -> Self {
        Self {
            last_run_id: run_id,
        }
    }
}

/// Static sector membership: which coins count as part of each sector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorMap(HashMap<String, Vec<String>>);

impl SectorMap {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        Self(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sectors file {}", path.display()))?;
        serde_json::from_str(&raw).context("Failed to parse sectors file")
    }

    /// Membership list for a sector; unknown sectors are simply empty.
    pub fn coins(&self, sector: &str) -> &[String] {
        self.0.get(sector).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, sector: &str) -> bool {
        self.0.contains_key(sector)
    }
}
