//! Static agent name → {labels, prompt, fan_in, ai_enabled} mapping (SPEC_FULL §4.2/§6.3/C9).
//!
//! Grounded on `src/agents/orchestrator/agent_registry.rs`'s register/get/get_all shape
//! (adapted here from dynamic trait-object registration to static config rows, since this
//! spec's agents are config, not code) and `BaseAgent.from_config` in
//! `original_source/apps/shared/shared/agent/base.py`, which reads the same shape out of
//! `agents.yaml`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpiralError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub labels: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub ai_enabled: bool,
    #[serde(default)]
    pub fan_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistryDocument {
    pub agents: HashMap<String, AgentConfig>,
}

/// In-memory view of the static agent config document.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentConfig>,
}

impl AgentRegistry {
    pub fn new(agents: HashMap<String, AgentConfig>) -> Self {
        Self { agents }
    }

    /// Parses the schematic YAML config shape from SPEC_FULL §6.3.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: AgentRegistryDocument = serde_yaml::from_str(yaml)
            .map_err(|e| SpiralError::Config(format!("invalid agent registry yaml: {e}")))?;
        Ok(Self::new(document.agents))
    }

    pub fn get(&self, agent_name: &str) -> Result<&AgentConfig> {
        self.agents.get(agent_name).ok_or_else(|| {
            SpiralError::Config(format!(
                "agent '{agent_name}' not found in registry. Available: {:?}",
                self.agents.keys().collect::<Vec<_>>()
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentConfig)> {
        self.agents.iter().map(|(k, v)| (k.as_str(), v))
    }
}
