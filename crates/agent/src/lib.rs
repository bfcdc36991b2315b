//! The agent loop: model access, email outreach, the procurement tool set,
//! and the conversation orchestrator that ties them together.

pub mod conversation;
pub mod email;
pub mod llm;
pub mod parser;
pub mod tools;

pub use conversation::{ChatOrchestrator, TurnOutcome};
pub use email::{Mailer, OutboundEmail, ResendMailer};
pub use llm::{ChatOutcome, LlmClient, LlmError, OpenAiClient, ToolDefinition, TurnMessage};
pub use tools::{Tool, ToolError, ToolRegistry, ToolResolver};
