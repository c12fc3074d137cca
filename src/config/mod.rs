//! Env-driven startup config (SPEC_FULL §6.4), plus loading the static agent registry.
//!
//! Grounded on `src/config/mod.rs`'s `Config::load()` env-var validation pattern, standardized
//! on `dotenvy` — the teacher's own `mod.rs` imported the unrelated `dotenv` crate, an
//! inconsistency not carried forward.

use std::env;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpiralError};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis_url: String,
    pub database_url: String,

    pub grok_api_key: String,
    pub grok_base_url: String,
    pub grok_model: String,
    pub grok_fast_model: String,

    pub api_host: String,
    pub api_port: u16,

    pub agents_config_path: String,
}

fn require_env(name: &str) -> Result<String> {
    let value = env::var(name)
        .map_err(|_| SpiralError::Config(format!("{name} environment variable is required")))?;
    if value.trim().is_empty() {
        return Err(SpiralError::Config(format!("{name} cannot be empty")));
    }
    Ok(value)
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads `.env` if present, then reads and validates the process environment. Fails fast
    /// (exit code 1, SPEC_FULL §6.5) rather than lazily at first task.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {e}"),
        }

        let redis_url = require_env("REDIS_URL")?;
        let database_url = require_env("DATABASE_URL")?;
        let grok_api_key = require_env("GROK_API_KEY")?;
        let grok_base_url = env_or("GROK_BASE_URL", "https://api.x.ai/v1");
        let grok_model = env_or("GROK_MODEL", "grok-2-latest");
        let grok_fast_model = env_or("GROK_FAST_MODEL", "grok-2-mini");

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port: u16 = env_or("API_PORT", "3000")
            .parse()
            .map_err(|_| SpiralError::Config("API_PORT must be a valid port number".to_string()))?;

        let agents_config_path = env_or("AGENTS_CONFIG_PATH", "agents.yaml");

        Ok(Config {
            redis_url,
            database_url,
            grok_api_key,
            grok_base_url,
            grok_model,
            grok_fast_model,
            api_host,
            api_port,
            agents_config_path,
        })
    }

    /// Reads the agent registry document from `agents_config_path` (SPEC_FULL §6.3).
    pub fn load_registry(&self) -> Result<AgentRegistry> {
        let yaml = fs::read_to_string(&self.agents_config_path).map_err(|e| {
            SpiralError::Config(format!(
                "could not read agent registry at {}: {e}",
                self.agents_config_path
            ))
        })?;
        AgentRegistry::from_yaml(&yaml)
    }
}
