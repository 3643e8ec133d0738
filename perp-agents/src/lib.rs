pub mod agents;
pub mod api;
pub mod config;
pub mod diary;
pub mod exec;
pub mod funding;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod system;

// Re-export main components
pub use agents::{MarketBelief, PerpAgent, SectorResearch, ToolCall};
pub use api::{ExchangeInfoClient, TelegramNotifier};
pub use config::{AgentConfig, SectorMap, SystemConfig};
pub use exec::{ExecutionPort, PaperExecution};
pub use ledger::OrderLedger;
pub use memory::ResearchMemory;
pub use system::AgentSystem;
