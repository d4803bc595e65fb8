//! Conversation history and its exportable renderings.
//!
//! Completed exchanges accumulate in a [`Transcript`]; either a single
//! exchange or the whole session can be exported as Markdown or plain text.
//! Citation ids are resolved to human-readable work titles where the id
//! prefix is known.

use crate::session::Persona;
use chrono::Local;
use std::fmt::Write as _;

/// Known source works, keyed by the prefix of their citation ids.
const WORK_TITLES: &[(&str, &str)] = &[
    ("ZHI", "Conceptual Atomism"),
    ("EP", "Essays in Philosophy"),
    ("CFACT", "Curious Facts"),
    ("ANALPHIL", "Analytic Philosophy"),
    ("CATOM", "Conception and Causation"),
    ("KMETA", "Metaphysics & Epistemology"),
    ("KEPIST", "Theoretical Knowledge"),
    ("OCD", "OCD and Philosophy"),
    ("DOCD", "Dialogue on OCD"),
    ("ATTACH", "Attachment Theory"),
    ("CHOMSKY", "Chomsky's Contributions"),
    ("KANT", "Kant and Hume on Induction"),
    ("INTENS", "Intensionality and Modality"),
    ("LOGIC", "Logic and Set Theory"),
    ("MORAL", "Moral Structure of Legal Obligation"),
    ("FREUD", "Works of Freud"),
    ("JUNG", "Works of Jung"),
];

fn work_title(prefix: &str) -> Option<&'static str> {
    WORK_TITLES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, title)| *title)
}

/// Resolves citation ids to a display line of distinct work titles.
///
/// The Freud and Jung databases use varying id prefixes for the same corpus,
/// so the persona overrides the prefix there. Unknown prefixes fall back to
/// listing the first three raw ids.
pub fn citation_summary(ids: &[String], persona: Persona) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut titles: Vec<&str> = Vec::new();

    for id in ids {
        let prefix = match persona {
            Persona::Freud => "FREUD",
            Persona::Jung => "JUNG",
            Persona::Kuczynski => id.split('-').next().unwrap_or(""),
        };
        if seen.contains(&prefix) {
            continue;
        }
        seen.push(prefix);
        if let Some(title) = work_title(prefix) {
            titles.push(title);
        }
    }

    if titles.is_empty() {
        ids.iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        titles.join(", ")
    }
}

/// One completed question/answer pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub persona: Persona,
    pub question: String,
    pub answer: String,
    pub citation_ids: Vec<String>,
}

impl Exchange {
    fn sources_line(&self) -> String {
        if self.citation_ids.is_empty() {
            return String::new();
        }
        format!(
            "Sources: {}",
            citation_summary(&self.citation_ids, self.persona)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Plain,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Plain => "txt",
        }
    }
}

const FOOTER: &str = "Generated by FreudGPT - The Thinker's Workshop";

/// Ordered record of every completed exchange in a session.
#[derive(Debug, Default)]
pub struct Transcript {
    exchanges: Vec<Exchange>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, exchange: Exchange) {
        self.exchanges.push(exchange);
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Export of a single exchange, as offered per answer.
    pub fn export_exchange(exchange: &Exchange, format: ExportFormat) -> String {
        let thinker = exchange.persona.display_name();
        let date = Local::now().format("%B %d, %Y");
        let sources = exchange.sources_line();

        match format {
            ExportFormat::Plain => {
                let rule = "=".repeat(80);
                let minor = "-".repeat(80);
                format!(
                    "CONVERSATION WITH {}\nDate: {date}\n\n{rule}\n\nYOU:\n{}\n\n{minor}\n\n{}:\n{}\n\n{minor}\n\n{sources}\n\n{rule}\n\n{FOOTER}\n",
                    thinker.to_uppercase(),
                    exchange.question,
                    thinker.to_uppercase(),
                    exchange.answer,
                )
            }
            ExportFormat::Markdown => {
                format!(
                    "# Conversation with {thinker}\nDate: {date}\n\n## Exchange\n\n**You:** {}\n\n**{thinker}:** {}\n\n**{sources}**\n\n---\n\n*{FOOTER}*\n",
                    exchange.question, exchange.answer,
                )
            }
        }
    }

    /// Export of the whole session, one section per exchange.
    pub fn export(&self, format: ExportFormat) -> String {
        let date = Local::now().format("%B %d, %Y %H:%M");
        let mut out = String::new();

        match format {
            ExportFormat::Plain => {
                let rule = "=".repeat(80);
                let minor = "-".repeat(80);
                let _ = write!(
                    out,
                    "COMPLETE WORKSHOP SESSION\nDate: {date}\nTotal Exchanges: {}\n\n{rule}\n\n",
                    self.exchanges.len()
                );
                for (index, exchange) in self.exchanges.iter().enumerate() {
                    let thinker = exchange.persona.display_name();
                    let _ = write!(
                        out,
                        "EXCHANGE {} - with {thinker}\n\nYOU:\n{}\n\n{minor}\n\n{}:\n{}\n\n{minor}\n\n{}\n\n{rule}\n\n",
                        index + 1,
                        exchange.question,
                        thinker.to_uppercase(),
                        exchange.answer,
                        exchange.sources_line(),
                    );
                }
                let _ = write!(out, "\n{FOOTER}");
            }
            ExportFormat::Markdown => {
                let _ = write!(
                    out,
                    "# Complete Workshop Session\nDate: {date}  \nTotal Exchanges: {}\n\n---\n\n",
                    self.exchanges.len()
                );
                for (index, exchange) in self.exchanges.iter().enumerate() {
                    let thinker = exchange.persona.display_name();
                    let _ = write!(
                        out,
                        "## Exchange {} - with {thinker}\n\n**You:** {}\n\n**{thinker}:** {}\n\n**{}**\n\n---\n\n",
                        index + 1,
                        exchange.question,
                        exchange.answer,
                        exchange.sources_line(),
                    );
                }
                let _ = write!(out, "\n*{FOOTER}*");
            }
        }

        out
    }
}
