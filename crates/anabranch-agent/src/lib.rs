pub mod claude;
pub mod cursor;
pub mod event;
pub mod parse;
pub mod process;
pub mod prompt;

use std::{sync::Arc, time::Duration};

use anabranch_core::{
    agent::CodingAgent,
    config::{AgentProvider, Config},
};

pub use claude::ClaudeCodeAgent;
pub use cursor::CursorAgent;

/// Builds the agent selected by `AGENT_PROVIDER`.
pub fn from_config(config: &Config) -> Arc<dyn CodingAgent> {
    let assessment_timeout =
        Duration::from_secs(config.assessment.timeout_minutes.saturating_mul(60));
    let bin = Some(config.agent_bin.clone()).filter(|b| !b.is_empty());

    match config.agent_provider {
        AgentProvider::ClaudeCode => {
            let mut agent = ClaudeCodeAgent::new(config.agent_api_key.clone())
                .with_model(config.agent_model.clone())
                .with_assessment_timeout(assessment_timeout)
                .with_max_budget_usd(Some(config.agent_max_budget_usd));
            if let Some(bin) = bin {
                agent = agent.with_bin(bin);
            }
            Arc::new(agent)
        }
        AgentProvider::Cursor => {
            let mut agent = CursorAgent::new(config.agent_api_key.clone())
                .with_model(config.agent_model.clone())
                .with_assessment_timeout(assessment_timeout);
            if let Some(bin) = bin {
                agent = agent.with_bin(bin);
            }
            Arc::new(agent)
        }
    }
}
