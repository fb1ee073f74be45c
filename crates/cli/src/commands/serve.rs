//! `agentrelay serve`: start the HTTP gateway.

use agentrelay_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() {
        eprintln!("  ⚠️  No API key configured; model calls will fail until one is set.");
    }

    println!("AgentRelay gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.default_model);

    agentrelay_gateway::start(config).await
}
