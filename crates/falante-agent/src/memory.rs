//! Per-session conversation memory.
//!
//! A keyed in-memory store: concurrent access across distinct sessions,
//! serialized within one session by the orchestrator's one-turn-at-a-time
//! rule. Entries outlive a disconnect, so a caller who reconnects with the
//! same session id resumes their conversation.

use crate::chat::ChatMessage;
use dashmap::DashMap;
use falante_voice::SessionId;

/// Messages kept per session; older exchanges are trimmed in pairs so the
/// window never starts with a dangling assistant turn.
const DEFAULT_WINDOW: usize = 64;

pub struct MemoryStore {
    sessions: DashMap<SessionId, Vec<ChatMessage>>,
    window: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            window: window.max(2),
        }
    }

    /// Snapshot of the session's history, oldest first.
    pub fn history(&self, session: &SessionId) -> Vec<ChatMessage> {
        self.sessions
            .get(session)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Record one completed exchange.
    pub fn append_exchange(&self, session: &SessionId, user: &str, assistant: &str) {
        let mut entry = self.sessions.entry(session.clone()).or_default();
        entry.push(ChatMessage::user(user));
        entry.push(ChatMessage::assistant(assistant));
        if entry.len() > self.window {
            let excess = entry.len() - self.window;
            // Trim whole exchanges.
            entry.drain(0..excess + (excess % 2));
        }
    }

    pub fn len(&self, session: &SessionId) -> usize {
        self.sessions.get(session).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, session: &SessionId) -> bool {
        self.len(session) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_append_in_order() {
        let store = MemoryStore::new();
        let id = SessionId::new("call-1");
        store.append_exchange(&id, "oi", "olá");
        store.append_exchange(&id, "tudo bem?", "tudo");

        let history = store.history(&id);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content.as_deref(), Some("oi"));
        assert_eq!(history[3].role, "assistant");
        assert_eq!(history[3].content.as_deref(), Some("tudo"));
    }

    #[test]
    fn sessions_do_not_share_history() {
        let store = MemoryStore::new();
        let a = SessionId::new("call-a");
        let b = SessionId::new("call-b");
        store.append_exchange(&a, "mensagem de a", "resposta a");
        store.append_exchange(&b, "mensagem de b", "resposta b");

        let history_a = store.history(&a);
        assert_eq!(history_a.len(), 2);
        assert!(history_a
            .iter()
            .all(|m| !m.content.as_deref().unwrap_or("").contains("de b")));
        assert_eq!(store.len(&b), 2);
    }

    #[test]
    fn window_trims_whole_exchanges() {
        let store = MemoryStore::with_window(4);
        let id = SessionId::new("call-1");
        for i in 0..5 {
            store.append_exchange(&id, &format!("pergunta {i}"), &format!("resposta {i}"));
        }
        let history = store.history(&id);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content.as_deref(), Some("pergunta 3"));
    }

    #[test]
    fn missing_session_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty(&SessionId::new("nobody")));
        assert!(store.history(&SessionId::new("nobody")).is_empty());
    }
}
