//! Terminal rendering of exchange and carousel instructions.

use std::io::{self, Write};
use std::sync::Mutex;
use workshop_core::content::FeedKind;
use workshop_core::session::Persona;
use workshop_core::transcript::citation_summary;
use workshop_core::{RenderOp, Renderer};

struct RenderState {
    writer: Box<dyn Write + Send>,
    persona: Option<Persona>,
    citations: Option<String>,
}

/// [`Renderer`] that writes exchanges as a linear conversation log.
///
/// Citations are held back until the answer completes so the sources line
/// never interrupts streaming text. Carousel output can be disabled for
/// quiet terminals.
pub struct TerminalRenderer {
    state: Mutex<RenderState>,
    show_feeds: bool,
}

impl TerminalRenderer {
    pub fn new(show_feeds: bool) -> Self {
        Self::with_writer(io::stdout(), show_feeds)
    }

    pub fn with_writer(writer: impl Write + Send + 'static, show_feeds: bool) -> Self {
        Self {
            state: Mutex::new(RenderState {
                writer: Box::new(writer),
                persona: None,
                citations: None,
            }),
            show_feeds,
        }
    }
}

fn feed_label(feed: FeedKind) -> &'static str {
    match feed {
        FeedKind::Quotes => "quote",
        FeedKind::Facts => "fact",
    }
}

impl Renderer for TerminalRenderer {
    fn apply(&self, op: &RenderOp) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let result = match op {
            RenderOp::ThinkingPlaceholder { persona } => {
                state.persona = Some(*persona);
                state.citations = None;
                writeln!(
                    state.writer,
                    "\n{} is contemplating...",
                    persona.display_name()
                )
            }
            RenderOp::AnswerStarted => {
                let name = state
                    .persona
                    .map(|p| p.display_name())
                    .unwrap_or("Thinker");
                write!(state.writer, "\n{name}: ")
            }
            RenderOp::AppendText { text } => {
                write!(state.writer, "{text}").and_then(|_| state.writer.flush())
            }
            RenderOp::SetCitations { ids, .. } => {
                if let Some(persona) = state.persona {
                    state.citations = Some(citation_summary(ids, persona));
                }
                Ok(())
            }
            RenderOp::Completed => {
                let sources = state.citations.take();
                match sources {
                    Some(line) if !line.is_empty() => {
                        writeln!(state.writer, "\n\nSources: {line}")
                    }
                    _ => writeln!(state.writer),
                }
            }
            RenderOp::Failed { message } => {
                writeln!(state.writer, "\n! {message}")
            }
            RenderOp::CarouselCard { feed, item } => {
                if self.show_feeds {
                    writeln!(state.writer, "  [{}] {}", feed_label(*feed), item.text)
                } else {
                    Ok(())
                }
            }
            RenderOp::CarouselProgress { feed, index, total } => {
                if self.show_feeds {
                    writeln!(
                        state.writer,
                        "  [{} {}/{}]",
                        feed_label(*feed),
                        index + 1,
                        total
                    )
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Terminal write failed");
        }
    }
}
