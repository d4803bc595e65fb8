//! Core logic for the Thinker's Workshop dialogue client.
//!
//! The crate decodes the workshop server's line-oriented streaming answer
//! protocol, drives the lifecycle of one question/answer exchange, and
//! rotates the two background knowledge feeds shown while an answer is being
//! produced. Presentation is delegated entirely to a [`Renderer`]
//! collaborator, so the same core runs against a terminal, a test recorder,
//! or a real UI.

pub mod carousel;
pub mod content;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;

use content::{CarouselItem, FeedKind};
use protocol::Position;
use session::Persona;

/// Render instructions issued by the core to the presentation collaborator.
///
/// This enum is the primary API for decoupling exchange and carousel state
/// from the runtime's execution of visible side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    /// Show the "thinker is contemplating" placeholder for a new exchange.
    ThinkingPlaceholder { persona: Persona },
    /// The first token arrived: replace the placeholder with live answer text.
    AnswerStarted,
    /// Append a chunk of streamed answer text.
    AppendText { text: String },
    /// Set the citation ids and quoted passages for the current answer.
    SetCitations {
        ids: Vec<String>,
        positions: Vec<Position>,
    },
    /// The exchange finished successfully.
    Completed,
    /// The exchange failed; show the message in place of further text.
    Failed { message: String },
    /// Show a background feed's current item.
    CarouselCard { feed: FeedKind, item: CarouselItem },
    /// Update the progress markers for a background feed.
    CarouselProgress {
        feed: FeedKind,
        index: usize,
        total: usize,
    },
}

/// Applies render instructions to whatever output exists.
///
/// Implementations must tolerate repeated identical instructions and must not
/// block: the orchestrator invokes this while holding its state lock so that
/// a superseded session can never interleave a stale render.
pub trait Renderer: Send + Sync {
    fn apply(&self, op: &RenderOp);
}
