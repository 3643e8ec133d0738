use anyhow::Result;
use dotenv::dotenv;
use perp_agents::AgentSystem;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    println!("🚀 Starting Perp Deep-Research Agents");
    println!("=================================");

    let mut system = AgentSystem::new().await?;

    println!("\n✅ System initialized successfully!");

    system.run().await?;

    Ok(())
}
