//! `agentrelay config`: configuration helpers.

use agentrelay_config::AppConfig;

pub fn print_default() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", AppConfig::default_toml());
    Ok(())
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed and validated");

    if !config.has_api_key() {
        println!("   ⚠️  No API key set (AGENTRELAY_API_KEY or OPENAI_API_KEY)");
    }
    println!();
    println!("   Endpoint:      {}", config.base_url);
    println!("   Model:         {}", config.default_model);
    println!("   Max steps:     {}", config.agent.max_steps);
    println!("   Language:      {}", config.agent.language.code());
    println!("   Gateway:       {}:{}", config.gateway.host, config.gateway.port);
    println!("   Remote tools:  {}", config.remote_tools.len());
    Ok(())
}

fn redacted_toml(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    toml::to_string_pretty(&config)
}
