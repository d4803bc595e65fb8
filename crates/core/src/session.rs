//! Lifecycle of one question/answer exchange.
//!
//! A [`Session`] owns the state machine for a single submitted question. Its
//! identity token is compared on every asynchronous completion so that a
//! superseded session's late-arriving frames become no-ops instead of
//! overwriting a newer exchange's output.

use crate::RenderOp;
use crate::protocol::{Frame, Position};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// The simulated thinker a question is addressed to. Doubles as the content
/// database id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Freud,
    Jung,
    Kuczynski,
}

impl Persona {
    /// Display name used in placeholders and transcripts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Persona::Freud => "Freud",
            Persona::Jung => "Jung",
            Persona::Kuczynski => "ZHI",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            Persona::Freud => "freud",
            Persona::Jung => "jung",
            Persona::Kuczynski => "kuczynski",
        };
        write!(f, "{id}")
    }
}

impl std::str::FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "freud" => Ok(Persona::Freud),
            "jung" => Ok(Persona::Jung),
            "kuczynski" | "zhi" => Ok(Persona::Kuczynski),
            other => Err(format!("unknown persona: '{other}'")),
        }
    }
}

/// Progression of a single exchange.
///
/// Transitions are monotone; the three right-hand states are terminal and
/// absorb any frame that arrives afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingFirstToken,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Cancelled
        )
    }
}

/// State and identity of one question/answer exchange.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    persona: Persona,
    question: String,
    state: SessionState,
    answer: String,
    citation_ids: Vec<String>,
    sources: Vec<Position>,
}

impl Session {
    /// Creates a fresh, idle session with a new identity token.
    pub fn new(persona: Persona, question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            persona,
            question: question.into(),
            state: SessionState::Idle,
            answer: String::new(),
            citation_ids: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// The identity token captured by asynchronous work on this session's
    /// behalf and compared against "current" before any effect is applied.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Answer text accumulated so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn citation_ids(&self) -> &[String] {
        &self.citation_ids
    }

    pub fn sources(&self) -> &[Position] {
        &self.sources
    }

    /// Marks the streaming request as dispatched. The renderer shows the
    /// thinking placeholder until the first token arrives.
    pub fn dispatch(&mut self) -> Vec<RenderOp> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        self.state = SessionState::AwaitingFirstToken;
        vec![RenderOp::ThinkingPlaceholder {
            persona: self.persona,
        }]
    }

    /// Applies one decoded frame and returns the render instructions it
    /// produces, in order. Frames arriving after a terminal state are
    /// discarded.
    pub fn apply(&mut self, frame: Frame) -> Vec<RenderOp> {
        if self.state.is_terminal() {
            debug!(session = %self.id, state = ?self.state, "Discarding frame for finished session");
            return Vec::new();
        }

        match frame {
            Frame::Token(text) => {
                let mut ops = Vec::new();
                if self.state != SessionState::Streaming {
                    // One-time, irreversible switch from placeholder to live text.
                    self.state = SessionState::Streaming;
                    ops.push(RenderOp::AnswerStarted);
                }
                self.answer.push_str(&text);
                ops.push(RenderOp::AppendText { text });
                ops
            }
            Frame::Sources { ids, positions } => {
                self.citation_ids = ids.clone();
                self.sources = positions.clone();
                vec![RenderOp::SetCitations { ids, positions }]
            }
            Frame::Done => {
                self.state = SessionState::Completed;
                vec![RenderOp::Completed]
            }
            Frame::Error { message } => {
                self.state = SessionState::Errored;
                vec![RenderOp::Failed { message }]
            }
        }
    }

    /// Supersedes the session: all in-flight work keyed to its token becomes
    /// stale. No-op once terminal.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
        }
    }
}
