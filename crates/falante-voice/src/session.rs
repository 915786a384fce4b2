//! Session and turn state for one call.
//!
//! A session is one continuous connection; a turn is one
//! transcribe → respond → synthesize cycle. Turn status only moves forward:
//! `Listening → Transcribing → Generating → Synthesizing → Completed`, with
//! `Failed` reachable from any non-terminal status.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one call. Supplied by the transport on connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Listening,
    Transcribing,
    Generating,
    Synthesizing,
    Completed,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Completed | TurnStatus::Failed)
    }

    /// Whether `next` is a legal move from `self`. `Failed` is reachable from
    /// any non-terminal status; `Completed` only from `Synthesizing`.
    pub fn allows(self, next: TurnStatus) -> bool {
        match (self, next) {
            (from, TurnStatus::Failed) => !from.is_terminal(),
            (TurnStatus::Listening, TurnStatus::Transcribing)
            | (TurnStatus::Transcribing, TurnStatus::Generating)
            | (TurnStatus::Generating, TurnStatus::Synthesizing)
            | (TurnStatus::Synthesizing, TurnStatus::Completed) => true,
            _ => false,
        }
    }
}

/// One request/response cycle.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: u64,
    pub transcript: Option<String>,
    pub reply: Option<String>,
    status: TurnStatus,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            transcript: None,
            reply: None,
            status: TurnStatus::Listening,
            started_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Move the turn forward. Backward or skipping transitions are rejected.
    pub fn advance(&mut self, next: TurnStatus) -> Result<(), PipelineError> {
        if !self.status.allows(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the turn failed. A no-op once the turn is terminal.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = TurnStatus::Failed;
        }
    }
}

/// What to do with an utterance that arrives while a turn is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPolicy {
    /// Discard the new utterance and log the conflict.
    #[default]
    Drop,
    /// Keep at most one utterance pending; further arrivals are discarded.
    QueueOne,
}

impl TurnPolicy {
    /// Parse from configuration (`drop` | `queue`). Unknown values fall back
    /// to `Drop`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "queue-one" | "queue_one" => TurnPolicy::QueueOne,
            _ => TurnPolicy::Drop,
        }
    }
}

/// Per-call conversational state, exclusively owned by the orchestrator task
/// for the lifetime of the connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    history: Vec<Turn>,
    next_turn: u64,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            history: Vec::new(),
            next_turn: 0,
        }
    }

    /// Allocate the next turn for this session.
    pub fn begin_turn(&mut self) -> Turn {
        self.next_turn += 1;
        Turn::new(self.next_turn)
    }

    /// Record a finished (completed or failed) turn.
    pub fn record(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut turn = Turn::new(1);
        assert!(turn.advance(TurnStatus::Transcribing).is_ok());
        assert!(turn.advance(TurnStatus::Generating).is_ok());
        assert!(turn.advance(TurnStatus::Synthesizing).is_ok());
        assert!(turn.advance(TurnStatus::Completed).is_ok());

        // Terminal: nothing further, not even Failed.
        assert!(turn.advance(TurnStatus::Failed).is_err());
        assert!(turn.advance(TurnStatus::Listening).is_err());
    }

    #[test]
    fn completed_only_from_synthesizing() {
        let mut turn = Turn::new(1);
        assert!(turn.advance(TurnStatus::Completed).is_err());
        turn.advance(TurnStatus::Transcribing).unwrap();
        assert!(turn.advance(TurnStatus::Completed).is_err());
    }

    #[test]
    fn failed_reachable_from_any_non_terminal() {
        for stop_at in [
            TurnStatus::Listening,
            TurnStatus::Transcribing,
            TurnStatus::Generating,
            TurnStatus::Synthesizing,
        ] {
            let mut turn = Turn::new(1);
            for next in [
                TurnStatus::Transcribing,
                TurnStatus::Generating,
                TurnStatus::Synthesizing,
            ] {
                if turn.status() == stop_at {
                    break;
                }
                turn.advance(next).unwrap();
            }
            turn.fail();
            assert_eq!(turn.status(), TurnStatus::Failed);
            // Failed is never revisited or escaped.
            assert!(turn.advance(TurnStatus::Transcribing).is_err());
            turn.fail();
            assert_eq!(turn.status(), TurnStatus::Failed);
        }
    }

    #[test]
    fn backward_transitions_rejected() {
        let mut turn = Turn::new(1);
        turn.advance(TurnStatus::Transcribing).unwrap();
        turn.advance(TurnStatus::Generating).unwrap();
        assert!(turn.advance(TurnStatus::Transcribing).is_err());
        assert_eq!(turn.status(), TurnStatus::Generating);
    }

    #[test]
    fn session_assigns_sequential_turn_ids() {
        let mut session = Session::new(SessionId::new("call-1"));
        let a = session.begin_turn();
        let b = session.begin_turn();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        session.record(a);
        session.record(b);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn turn_policy_parsing() {
        assert_eq!(TurnPolicy::parse("queue"), TurnPolicy::QueueOne);
        assert_eq!(TurnPolicy::parse("drop"), TurnPolicy::Drop);
        assert_eq!(TurnPolicy::parse("nonsense"), TurnPolicy::Drop);
    }
}
