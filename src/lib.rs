//! A computer-use agent: a model drives a remote browser or desktop through
//! screenshots and low-level input actions.

pub mod agent;
pub mod brain;
pub mod config;
pub mod continuity;
pub mod error;
pub mod hands;
pub mod keys;
pub mod provider;
pub mod surface;
pub mod tools;
pub mod translator;
pub mod types;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentEvent, AgentState, Session};
pub use brain::{ModelClient, ModelInvoker, ModelRequest, OpenAiResponses};
pub use config::{AgentConfig, Descriptor, Environment, Provider, Timing};
pub use error::{AgentError, ConfigError};
pub use provider::{Instance, InstanceProvider, InstanceStatus};
pub use surface::AutomationSurface;
pub use translator::ActionTranslator;
pub use types::{AssistantMessage, Message, ToolCall, ToolResult};
