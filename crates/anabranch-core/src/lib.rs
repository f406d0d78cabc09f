pub mod agent;
pub mod assessment;
pub mod config;
pub mod execution;
pub mod git;
pub mod orchestrator;
pub mod processor;
pub mod pull_request;
pub mod queue;
pub mod retry;
pub mod source_control;
pub mod ticketing;
pub mod types;
pub mod workspace;

pub use types::*;
