//! # falante-agent — the response agent behind the voice pipeline
//!
//! Generates reply text from a transcript plus per-session conversation
//! memory, optionally calling registered tools (fixed typed argument
//! schemas, dispatched through a lookup table) during generation. Implements
//! [`falante_voice::AgentBackend`], so the orchestrator only sees
//! `respond(session, text) -> Result<String, AgentError>`.

pub mod agent;
pub mod chat;
pub mod memory;
pub mod tools;

pub use agent::ResponseAgent;
pub use chat::{ChatClient, ChatMessage, ToolCall, ToolSpec};
pub use memory::MemoryStore;
pub use tools::{MultiplyNumbers, SumNumbers, Tool, ToolError, ToolRegistry};
