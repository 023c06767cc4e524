//! Agent configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for one agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum remote round-trips per `run` (must be at least 1)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Instruction sent as the leading system message of every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help you answer accurately."
        .into()
}
fn default_temperature() -> f32 {
    0.7
}

impl AgentConfig {
    /// Check the invariants the agent loop relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config {
                message: "max_iterations must be at least 1".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config {
                message: format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    self.temperature
                ),
            });
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
        }
    }
}
