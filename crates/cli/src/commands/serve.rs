//! `bizpilot serve`: Start the HTTP API server.

use bizpilot_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Bizpilot Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {} via {}", config.llm.model, config.llm.provider);
    println!("   Database:  {}", config.database.url);

    bizpilot_gateway::start(config).await?;

    Ok(())
}
