//! Rotating background feeds with periodic advance and low-water-mark refill.
//!
//! Each [`Carousel`] owns one feed: it fetches an initial page for the
//! selected persona, rotates through it on a fixed period from a spawned
//! ticker task, and (for the quotes feed) fetches more content when the
//! cursor reaches the end instead of wrapping immediately. Teardown is by
//! staleness: `stop` aborts the ticker and bumps a generation counter so any
//! in-flight fetch's eventual result is discarded rather than applied.

use crate::content::{CarouselItem, ContentSource, FeedKind};
use crate::session::Persona;
use crate::{RenderOp, Renderer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Tuning for one feed. The two live feeds share the engine and differ only
/// here.
#[derive(Debug, Clone, Copy)]
pub struct RotationConfig {
    /// Time between automatic `advance` ticks.
    pub period: Duration,
    /// Items requested per fetch.
    pub page_size: usize,
    /// Whether reaching the end triggers a refill fetch before wrapping.
    pub refill_on_wrap: bool,
}

impl RotationConfig {
    /// The slower quote feed, refilled at the low-water mark.
    pub fn quotes() -> Self {
        Self {
            period: Duration::from_millis(4000),
            page_size: 8,
            refill_on_wrap: true,
        }
    }

    /// The faster facts feed, which wraps around its initial page.
    pub fn facts() -> Self {
        Self {
            period: Duration::from_millis(1500),
            page_size: 8,
            refill_on_wrap: false,
        }
    }
}

#[derive(Debug, Default)]
struct FeedState {
    items: Vec<CarouselItem>,
    cursor: usize,
    generation: u64,
    refill_in_flight: bool,
    persona: Option<Persona>,
}

/// One autonomously rotating content feed.
///
/// All mutable state sits behind an async mutex shared with the ticker task,
/// and every fetch closes over the generation current at launch time.
pub struct Carousel {
    feed: FeedKind,
    config: RotationConfig,
    source: Arc<dyn ContentSource>,
    renderer: Arc<dyn Renderer>,
    state: Arc<Mutex<FeedState>>,
    rotation: Option<JoinHandle<()>>,
}

impl Carousel {
    pub fn new(
        feed: FeedKind,
        config: RotationConfig,
        source: Arc<dyn ContentSource>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            feed,
            config,
            source,
            renderer,
            state: Arc::new(Mutex::new(FeedState::default())),
            rotation: None,
        }
    }

    /// Resets the feed for `persona`, performs the initial fetch, renders the
    /// first item, and begins periodic rotation. Any prior rotation or
    /// in-flight fetch is discarded first.
    pub async fn start(&mut self, persona: Persona) {
        self.stop().await;

        let generation = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.items.clear();
            state.cursor = 0;
            state.refill_in_flight = false;
            state.persona = Some(persona);
            state.generation
        };

        match self
            .source
            .fetch(persona, self.feed, self.config.page_size, &[])
            .await
        {
            Ok(items) => {
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    append_new(self.feed, &mut state.items, items);
                    if !state.items.is_empty() {
                        render_current(self.renderer.as_ref(), self.feed, &state);
                    }
                }
            }
            Err(e) => {
                warn!(feed = %self.feed, error = %e, "Initial carousel fetch failed");
            }
        }

        let feed = self.feed;
        let config = self.config;
        let source = Arc::clone(&self.source);
        let renderer = Arc::clone(&self.renderer);
        let state = Arc::clone(&self.state);
        self.rotation = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick belongs to `start`, not the rotation.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                advance_feed(feed, config, &source, &renderer, &state, generation).await;
            }
        }));
    }

    /// Advances by one position. Public so hosts and tests can drive ticks
    /// without waiting for the timer.
    pub async fn advance(&self) {
        let generation = self.state.lock().await.generation;
        advance_feed(
            self.feed,
            self.config,
            &self.source,
            &self.renderer,
            &self.state,
            generation,
        )
        .await;
    }

    /// Cancels the rotation timer and marks any in-flight fetch stale.
    /// Idempotent: safe before `start` and when already stopped. Invokes no
    /// render callback.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.rotation.take() {
            handle.abort();
            debug!(feed = %self.feed, "Carousel rotation stopped");
        }
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.refill_in_flight = false;
    }

    /// Whether a rotation timer is currently held.
    pub fn is_rotating(&self) -> bool {
        self.rotation.is_some()
    }
}

/// One rotation step. No-op on lists of one or fewer items; on a refilling
/// feed that has reached its end, fetches more content (excluding held ids)
/// and only moves past the end once new items are appended, wrapping to the
/// start when the refill fails or returns nothing new.
async fn advance_feed(
    feed: FeedKind,
    config: RotationConfig,
    source: &Arc<dyn ContentSource>,
    renderer: &Arc<dyn Renderer>,
    state: &Arc<Mutex<FeedState>>,
    generation: u64,
) {
    let (persona, exclude) = {
        let mut state = state.lock().await;
        if state.generation != generation {
            return;
        }
        // While a refill is pending the feed stays frozen on its last item;
        // the ticker keeps trying regardless.
        if state.refill_in_flight {
            return;
        }
        if state.items.len() <= 1 {
            return;
        }

        let next = state.cursor + 1;
        if next < state.items.len() {
            state.cursor = next;
            render_current(renderer.as_ref(), feed, &state);
            return;
        }
        if !config.refill_on_wrap {
            state.cursor = 0;
            render_current(renderer.as_ref(), feed, &state);
            return;
        }

        let Some(persona) = state.persona else {
            return;
        };
        state.refill_in_flight = true;
        let exclude: Vec<String> = state.items.iter().map(|item| item.id.clone()).collect();
        (persona, exclude)
    };

    debug!(feed = %feed, held = exclude.len(), "Refilling carousel at low-water mark");
    let fetched = source.fetch(persona, feed, config.page_size, &exclude).await;

    let mut state = state.lock().await;
    if state.generation != generation {
        // Superseded while the fetch was in flight.
        return;
    }
    state.refill_in_flight = false;

    let appended = match fetched {
        Ok(items) => {
            let before = state.items.len();
            append_new(feed, &mut state.items, items);
            state.items.len() - before
        }
        Err(e) => {
            debug!(feed = %feed, error = %e, "Carousel refill failed; wrapping around");
            0
        }
    };

    if appended > 0 {
        // First of the newly appended items.
        state.cursor += 1;
    } else {
        state.cursor = 0;
    }
    render_current(renderer.as_ref(), feed, &state);
}

/// Appends items whose ids are not already held; the exclusion hint sent with
/// the fetch may have been ignored by the server.
fn append_new(feed: FeedKind, existing: &mut Vec<CarouselItem>, fetched: Vec<CarouselItem>) {
    for item in fetched {
        if existing.iter().any(|held| held.id == item.id) {
            debug!(feed = %feed, id = %item.id, "Dropping duplicate carousel item");
            continue;
        }
        existing.push(item);
    }
}

fn render_current(renderer: &dyn Renderer, feed: FeedKind, state: &FeedState) {
    if let Some(item) = state.items.get(state.cursor) {
        renderer.apply(&RenderOp::CarouselCard {
            feed,
            item: item.clone(),
        });
        renderer.apply(&RenderOp::CarouselProgress {
            feed,
            index: state.cursor,
            total: state.items.len(),
        });
    }
}
