//! Background knowledge content for the rotating panel feeds.

use crate::session::Persona;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One quote or fact shown by a rotating feed. Identity is `id`, used for
/// de-duplication across refills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// The two independent background feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Quotes,
    Facts,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Quotes => write!(f, "quotes"),
            FeedKind::Facts => write!(f, "facts"),
        }
    }
}

/// Serves pages of background content for a persona.
///
/// `exclude` lists ids already on display. Servers are free to ignore the
/// hint (the workshop server does), so callers must drop duplicates from
/// whatever comes back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(
        &self,
        persona: Persona,
        feed: FeedKind,
        count: usize,
        exclude: &[String],
    ) -> Result<Vec<CarouselItem>>;
}

/// Both feeds arrive in one payload from the random-quotes endpoint.
#[derive(Debug, Deserialize)]
struct KnowledgePage {
    #[serde(default)]
    quotes: Vec<CarouselItem>,
    #[serde(default)]
    positions: Vec<CarouselItem>,
}

impl KnowledgePage {
    fn into_feed(self, feed: FeedKind) -> Vec<CarouselItem> {
        match feed {
            FeedKind::Quotes => self.quotes,
            FeedKind::Facts => self.positions,
        }
    }
}

/// `ContentSource` backed by the workshop server's `/api/random-quotes`
/// endpoint.
pub struct HttpContentSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpContentSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(
        &self,
        persona: Persona,
        feed: FeedKind,
        count: usize,
        exclude: &[String],
    ) -> Result<Vec<CarouselItem>> {
        let url = format!("{}/api/random-quotes", self.base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url).query(&[
            ("database", persona.to_string()),
            ("count", count.to_string()),
        ]);
        if !exclude.is_empty() {
            request = request.query(&[("exclude", exclude.join(","))]);
        }

        let page: KnowledgePage = request
            .send()
            .await
            .context("random-quotes request failed")?
            .error_for_status()
            .context("random-quotes request rejected")?
            .json()
            .await
            .context("random-quotes payload was not valid JSON")?;

        Ok(page.into_feed(feed))
    }
}
