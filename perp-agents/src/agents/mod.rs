use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use common::providers::ChatClient;
use common::JsonStore;
use std::collections::HashMap;
use std::path::Path;

use crate::api::{ExchangeInfoClient, TelegramNotifier};
use crate::config::{AgentConfig, RunState, SectorMap, SystemConfig};
use crate::diary::Diary;
use crate::exec::ExecutionPort;
use crate::ledger::OrderLedger;
use crate::memory::ResearchMemory;
use crate::models::ResearchSnapshot;

pub mod prompts;
pub mod replies;

mod research;
mod trade;

pub use replies::{MarketBelief, ToolCall};

/// Folders created under the agent's data directory at startup.
const DATA_FOLDERS: &[&str] = &["research", "sector-picks", "orders", "diary", "state"];

/// Broadcast severity. Every message still reaches every sink; the level
/// only changes the console color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// One research pass over a sector, ready for the trade phase.
#[derive(Debug, Clone)]
pub struct SectorResearch {
    pub sector: String,
    pub snapshot: ResearchSnapshot,
    pub coin_to_price: HashMap<String, f64>,
    /// True when a recent snapshot stood in for a new model call.
    pub reused: bool,
}

/// A deep-research trading agent: one persona, one data directory, one
/// research-to-trade cycle per run.
pub struct PerpAgent {
    pub(crate) config: AgentConfig,
    pub(crate) store: JsonStore,
    pub(crate) chat: ChatClient,
    pub(crate) info: ExchangeInfoClient,
    pub(crate) exec: Box<dyn ExecutionPort>,
    pub(crate) notifier: TelegramNotifier,
    pub(crate) memory: ResearchMemory,
    pub(crate) ledger: OrderLedger,
    pub(crate) diary: Diary,
    pub(crate) sectors: SectorMap,
}

impl PerpAgent {
    pub async fn new(
        system: &SystemConfig,
        mut config: AgentConfig,
        sectors: SectorMap,
        exec: Box<dyn ExecutionPort>,
    ) -> Result<Self> {
        if let Some(endpoint) = &system.model_override {
            config.research_model = endpoint.clone();
            config.trade_model = endpoint.clone();
        }

        let store = JsonStore::new(Path::new(&system.data_dir).join(&config.agent_id));
        store.init_folders(DATA_FOLDERS).await?;

        let memory = ResearchMemory::new(store.clone());
        memory.enforce_caps().await?;
        let ledger = OrderLedger::load(store.clone()).await?;
        let diary = Diary::load(store.clone()).await?;

        Ok(Self {
            chat: ChatClient::new(system.completion_retries)?,
            info: ExchangeInfoClient::new(&system.info_url)?,
            notifier: TelegramNotifier::from_env(system.telegram_enabled)?,
            config,
            store,
            exec,
            memory,
            ledger,
            diary,
            sectors,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.agent_id
    }

    /// Run one research-to-trade cycle if the frequency gate allows it.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> Result<()> {
        let run_id = now.timestamp_millis();
        let state = RunState::load(&self.store).await?;
        if !state.due(self.config.trade_frequency_ms, run_id) {
            println!("[{}] Trade frequency not met, sleeping...", self.id());
            return Ok(());
        }
        // The slot is consumed up front: a failed run waits out the full
        // frequency window instead of retrying on the next tick.
        state.advance(run_id).save(&self.store).await?;

        self.broadcast(
            Level::Info,
            &format!("Beginning agent loop {}...", run_id),
            true,
        )
        .await;

        let meta = self.info.perp_metadata().await?;
        for notice in self.exec.mark_to_market(&meta, run_id).await? {
            self.note(&notice).await;
        }

        let belief = self.market_belief().await?;
        let picks = self.pick_sectors(&belief).await?;
        self.store
            .save("sector-picks", &run_id.to_string(), &picks)
            .await?;

        for pick in picks {
            let research = match self.research_sector(&pick.name, &meta, now).await {
                Ok(research) => research,
                Err(e) => {
                    self.broadcast(
                        Level::Error,
                        &format!("Research for {} failed: {}", pick.name, e),
                        false,
                    )
                    .await;
                    continue;
                }
            };
            if let Err(e) = self.trade_sector(&research, &meta, now).await {
                self.broadcast(
                    Level::Error,
                    &format!("Trade pass for {} failed: {}", pick.name, e),
                    false,
                )
                .await;
            }
        }

        self.note("---\nEnd of agent loop, entering sleep mode...")
            .await;
        Ok(())
    }

    /// Write one message to every sink: console, diary, Telegram. A sink
    /// failure is logged and never fails the run. `new_thread` starts a
    /// fresh Telegram message; otherwise the text is appended to the open
    /// one.
    pub async fn broadcast(&mut self, level: Level, message: &str, new_thread: bool) {
        let prefix = format!("[{}]", self.id());
        match level {
            Level::Info => println!("{} {}", prefix.cyan(), message),
            Level::Error => println!("{} {}", prefix.red(), message),
        }

        if let Err(e) = self.diary.write(message, Utc::now()).await {
            println!("⚠️ {} Failed to write diary entry: {}", prefix, e);
        }

        let delivery = if new_thread {
            self.notifier.send(&format!("{} {}", prefix, message)).await
        } else {
            self.notifier.append(message).await
        };
        if let Err(e) = delivery {
            println!("⚠️ {} Telegram delivery failed: {}", prefix, e);
        }
    }

    /// Shorthand for the common case: informational, appended to the open
    /// Telegram thread.
    pub(crate) async fn note(&mut self, message: &str) {
        self.broadcast(Level::Info, message, false).await;
    }
}
