use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::JsonStore;
use tokio::time;

use crate::agents::{Level, PerpAgent};
use crate::config::{load_agents, SectorMap, SystemConfig};
use crate::exec::PaperExecution;

/// All configured agents plus the shared clock that drives them. Every tick
/// offers every agent a run; the agents gate themselves on their own trade
/// frequency.
pub struct AgentSystem {
    config: SystemConfig,
    agents: Vec<PerpAgent>,
}

impl AgentSystem {
    pub async fn new() -> Result<Self> {
        let config = SystemConfig::from_env()?;
        if let Some(endpoint) = &config.model_override {
            println!("🔁 Model override active: {}", endpoint);
        }

        let sectors_file =
            env::var("SECTORS_FILE").unwrap_or_else(|_| "config/sectors.json".to_string());
        let agents_file =
            env::var("AGENTS_FILE").unwrap_or_else(|_| "config/agents.json".to_string());
        let sectors = SectorMap::load(Path::new(&sectors_file))?;
        let configs = load_agents(Path::new(&agents_file))?;

        println!("🔄 Initializing {} agent(s):", configs.len());
        let mut agents = Vec::with_capacity(configs.len());
        for agent_config in configs {
            println!(
                "🤖 {}: sectors [{}], research {}, trade {}, every {}h",
                agent_config.agent_id,
                agent_config.sectors.join(", "),
                agent_config.research_model.model,
                agent_config.trade_model.model,
                agent_config.trade_frequency_ms as f64 / 3_600_000.0,
            );
            let store = JsonStore::new(Path::new(&config.data_dir).join(&agent_config.agent_id));
            let exec = Box::new(PaperExecution::load(store).await?);
            agents.push(PerpAgent::new(&config, agent_config, sectors.clone(), exec).await?);
        }

        Ok(Self { config, agents })
    }

    /// Offer every agent one run. One agent failing its loop never stops
    /// the others.
    pub async fn run_cycle(&mut self) {
        let now = Utc::now();
        for agent in &mut self.agents {
            if let Err(e) = agent.run_once(now).await {
                agent
                    .broadcast(Level::Error, &format!("Agent loop failed: {}", e), false)
                    .await;
            }
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("\n🤖 Perp Deep-Research Agents");
        println!(
            "{} agent(s), checking every {} seconds",
            self.agents.len(),
            self.config.loop_interval_secs
        );
        println!("Press Ctrl+C to exit\n");

        let mut interval = time::interval(Duration::from_secs(self.config.loop_interval_secs));
        loop {
            interval.tick().await;
            self.run_cycle().await;
            println!(
                "\n⏳ Next check in {} seconds...",
                self.config.loop_interval_secs
            );
        }
    }
}
