//! The response agent: conversation memory + chat completions + tools.

use crate::chat::{ChatClient, ChatMessage};
use crate::memory::MemoryStore;
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use falante_voice::{AgentBackend, AgentError, SessionId};
use tracing::{debug, warn};

/// The persona and the speech-safety contract. The output constraint (no
/// emoji, symbols, or markup) is an instruction to the model, not a runtime
/// check — synthesis gets whatever the model produces.
const SYSTEM_PROMPT: &str = "Você é Delb's, uma assistente de matemática prestativa e com uma \
personalidade acolhedora. Você pode ajudar com operações matemáticas básicas usando suas \
ferramentas; sempre use as ferramentas quando solicitado a fazer cálculos. Sua resposta será \
convertida em áudio, portanto não inclua emojis, símbolos ou caracteres especiais. Mantenha as \
respostas curtas, amigáveis e em tom de conversa, em português do Brasil.";

/// Spoken when a tool invocation fails: degraded reply, not a pipeline error.
const TOOL_APOLOGY: &str =
    "Desculpe, não consegui usar minhas ferramentas agora. Pode tentar de novo?";

/// Bound on model → tool → model round trips within one reply.
const MAX_TOOL_ROUNDS: usize = 4;

/// Generates replies with per-session memory and a typed tool set.
pub struct ResponseAgent {
    client: ChatClient,
    tools: ToolRegistry,
    memory: MemoryStore,
    system_prompt: String,
}

impl ResponseAgent {
    /// Agent with the built-in arithmetic tools and the default persona.
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            tools: ToolRegistry::with_builtin_math(),
            memory: MemoryStore::new(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// The durable keyed memory store (external to the orchestrator).
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    async fn generate(&self, session: &SessionId, text: &str) -> Result<String, AgentError> {
        let mut messages = Vec::with_capacity(self.memory.len(session) + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(self.memory.history(session));
        messages.push(ChatMessage::user(text));

        let specs = self.tools.specs();
        let tools = (!specs.is_empty()).then_some(specs.as_slice());

        for round in 0..MAX_TOOL_ROUNDS {
            let reply = self.client.complete(&messages, tools).await?;
            let calls = match &reply.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => return Ok(reply.content.clone().unwrap_or_default()),
            };
            debug!(session = %session, round, calls = calls.len(), "resolving tool calls");
            messages.push(reply);
            for call in calls {
                match self.tools.dispatch(&call.function.name, &call.function.arguments) {
                    Ok(value) => messages.push(ChatMessage::tool(call.id, value.to_string())),
                    Err(e) => {
                        // Policy: a tool failure degrades to an apologetic
                        // reply instead of failing the turn.
                        warn!(session = %session, error = %e, "tool call failed");
                        return Ok(TOOL_APOLOGY.to_string());
                    }
                }
            }
        }
        warn!(session = %session, "tool rounds exhausted without a final reply");
        Ok(TOOL_APOLOGY.to_string())
    }
}

#[async_trait]
impl AgentBackend for ResponseAgent {
    async fn respond(&self, session: &SessionId, text: &str) -> Result<String, AgentError> {
        let reply = self.generate(session, text).await?;
        // Both turns land in memory before the reply is returned, so history
        // ordering matches what the caller actually heard.
        self.memory.append_exchange(session, text, &reply);
        Ok(reply)
    }
}
