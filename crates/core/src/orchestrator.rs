//! Composition of decoder, session, and carousels into one exchange flow.
//!
//! The [`Orchestrator`] owns the single current [`Session`] and both
//! background feeds. Submitting a question supersedes whatever came before:
//! the prior session is cancelled (its in-flight frames become no-ops via the
//! identity-token check), both carousels restart for the new persona, and a
//! pump task is spawned to read the answer stream to its end. Terminal frames
//! stop the carousels and record the exchange in the transcript.

use crate::carousel::{Carousel, RotationConfig};
use crate::content::{ContentSource, FeedKind};
use crate::protocol::{Frame, FrameStream, frame_stream};
use crate::session::{Persona, Session, SessionState};
use crate::transcript::{Exchange, ExportFormat, Transcript};
use crate::transport::{AskRequest, StreamOpener};
use crate::{RenderOp, Renderer};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Answer-pipeline knobs sent with every ask request.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub provider: String,
    pub model: String,
    pub enhanced_mode: bool,
    pub answer_length: String,
    pub quote_count: u32,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            enhanced_mode: false,
            answer_length: "medium".to_string(),
            quote_count: 3,
        }
    }
}

impl RequestSettings {
    fn request(&self, question: &str, persona: Persona) -> AskRequest {
        AskRequest {
            question: question.to_string(),
            database: persona,
            provider: self.provider.clone(),
            model: self.model.clone(),
            enhanced_mode: self.enhanced_mode,
            answer_length: self.answer_length.clone(),
            quote_count: self.quote_count,
        }
    }
}

/// How one submitted question ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Completed {
        answer: String,
        citation_ids: Vec<String>,
    },
    Errored {
        message: String,
    },
    Cancelled,
}

/// Sequences end-to-end exchanges over injected collaborators.
pub struct Orchestrator {
    opener: Arc<dyn StreamOpener>,
    renderer: Arc<dyn Renderer>,
    quotes: Arc<Mutex<Carousel>>,
    facts: Arc<Mutex<Carousel>>,
    current: Arc<Mutex<Option<Session>>>,
    transcript: Arc<Mutex<Transcript>>,
    panel_open: Arc<AtomicBool>,
    settings: RequestSettings,
    pump: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        opener: Arc<dyn StreamOpener>,
        source: Arc<dyn ContentSource>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let quotes = Carousel::new(
            FeedKind::Quotes,
            RotationConfig::quotes(),
            Arc::clone(&source),
            Arc::clone(&renderer),
        );
        let facts = Carousel::new(
            FeedKind::Facts,
            RotationConfig::facts(),
            source,
            Arc::clone(&renderer),
        );
        Self {
            opener,
            renderer,
            quotes: Arc::new(Mutex::new(quotes)),
            facts: Arc::new(Mutex::new(facts)),
            current: Arc::new(Mutex::new(None)),
            transcript: Arc::new(Mutex::new(Transcript::new())),
            panel_open: Arc::new(AtomicBool::new(false)),
            settings: RequestSettings::default(),
            pump: None,
        }
    }

    pub fn with_settings(mut self, settings: RequestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Supersedes any current exchange and starts a new one. The returned
    /// channel resolves with the exchange's outcome once its stream has been
    /// read to the end.
    pub async fn submit(
        &mut self,
        persona: Persona,
        question: impl Into<String>,
    ) -> oneshot::Receiver<ExchangeOutcome> {
        let question = question.into();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        {
            let mut current = self.current.lock().await;
            if let Some(prior) = current.as_mut() {
                debug!(session = %prior.id(), "Superseding prior session");
                prior.cancel();
            }
        }

        self.panel_open.store(true, Ordering::SeqCst);

        let mut session = Session::new(persona, question.clone());
        let token = session.id();
        info!(session = %token, persona = %persona, "Submitting question");

        // The new session must be current before its carousels start, so a
        // prior pump's teardown always sees the supersession (its token no
        // longer matches) before it can touch the fresh rotations.
        {
            let mut current = self.current.lock().await;
            for op in session.dispatch() {
                self.renderer.apply(&op);
            }
            *current = Some(session);
        }

        self.quotes.lock().await.start(persona).await;
        self.facts.lock().await.start(persona).await;

        let request = self.settings.request(&question, persona);
        let body = match self.opener.open(&request).await {
            Ok(body) => body,
            Err(e) => {
                warn!(session = %token, error = %e, "Failed to open answer stream");
                let message = e.to_string();
                {
                    let mut current = self.current.lock().await;
                    if let Some(session) = current.as_mut().filter(|s| s.id() == token) {
                        for op in session.apply(Frame::Error {
                            message: message.clone(),
                        }) {
                            self.renderer.apply(&op);
                        }
                    }
                }
                self.quotes.lock().await.stop().await;
                self.facts.lock().await.stop().await;
                let _ = outcome_tx.send(ExchangeOutcome::Errored { message });
                return outcome_rx;
            }
        };

        // Prior pump tasks keep draining their streams to release the
        // connection; the token check turns their frames into no-ops.
        self.pump = Some(tokio::spawn(pump_frames(
            frame_stream(body),
            token,
            Arc::clone(&self.current),
            Arc::clone(&self.renderer),
            Arc::clone(&self.quotes),
            Arc::clone(&self.facts),
            Arc::clone(&self.transcript),
            Arc::clone(&self.panel_open),
            outcome_tx,
        )));

        outcome_rx
    }

    /// User closed the panel: both carousels stop, and any still-open answer
    /// stream finishes in the background without further visible output.
    pub async fn close_panel(&self) {
        info!("Panel closed");
        self.panel_open.store(false, Ordering::SeqCst);
        self.quotes.lock().await.stop().await;
        self.facts.lock().await.stop().await;
    }

    /// Whether either background feed is still rotating.
    pub async fn is_panel_active(&self) -> bool {
        self.quotes.lock().await.is_rotating() || self.facts.lock().await.is_rotating()
    }

    pub async fn current_state(&self) -> Option<SessionState> {
        self.current.lock().await.as_ref().map(Session::state)
    }

    /// Export of the most recently completed exchange, if any.
    pub async fn export_last_exchange(&self, format: ExportFormat) -> Option<String> {
        let transcript = self.transcript.lock().await;
        transcript
            .exchanges()
            .last()
            .map(|exchange| Transcript::export_exchange(exchange, format))
    }

    /// Export of every completed exchange in this session, if any.
    pub async fn export_session(&self, format: ExportFormat) -> Option<String> {
        let transcript = self.transcript.lock().await;
        if transcript.is_empty() {
            None
        } else {
            Some(transcript.export(format))
        }
    }
}

/// Reads one answer stream to its end, applying frames to the session that
/// owns them.
///
/// Every frame is gated on the session token still being current, checked
/// under the state lock so a superseded exchange can never interleave a
/// stale render. The stream is always drained fully; if no terminal frame
/// was applied on our behalf the exchange was superseded and resolves as
/// cancelled.
#[allow(clippy::too_many_arguments)]
async fn pump_frames(
    mut frames: FrameStream,
    token: Uuid,
    current: Arc<Mutex<Option<Session>>>,
    renderer: Arc<dyn Renderer>,
    quotes: Arc<Mutex<Carousel>>,
    facts: Arc<Mutex<Carousel>>,
    transcript: Arc<Mutex<Transcript>>,
    panel_open: Arc<AtomicBool>,
    outcome: oneshot::Sender<ExchangeOutcome>,
) {
    let mut outcome = Some(outcome);

    while let Some(frame) = frames.next().await {
        let finished = {
            let mut current = current.lock().await;
            let Some(session) = current.as_mut().filter(|s| s.id() == token) else {
                debug!(session = %token, "Discarding frame for superseded session");
                continue;
            };

            let ops = session.apply(frame);
            if panel_open.load(Ordering::SeqCst) {
                for op in &ops {
                    renderer.apply(op);
                }
            }

            match session.state() {
                SessionState::Completed if !ops.is_empty() => {
                    transcript.lock().await.record(Exchange {
                        persona: session.persona(),
                        question: session.question().to_string(),
                        answer: session.answer().to_string(),
                        citation_ids: session.citation_ids().to_vec(),
                    });
                    Some(ExchangeOutcome::Completed {
                        answer: session.answer().to_string(),
                        citation_ids: session.citation_ids().to_vec(),
                    })
                }
                SessionState::Errored if !ops.is_empty() => Some(ExchangeOutcome::Errored {
                    message: match ops.last() {
                        Some(RenderOp::Failed { message }) => message.clone(),
                        _ => String::new(),
                    },
                }),
                _ => None,
            }
        };

        if let Some(result) = finished {
            info!(session = %token, outcome = ?result, "Exchange finished");
            {
                // Teardown is an effect too: re-check the token with the
                // carousel locks held, or a submit landing between the
                // terminal frame and this point would have its freshly
                // started rotations torn down by the old pump.
                let mut quotes = quotes.lock().await;
                let mut facts = facts.lock().await;
                let still_current = current
                    .lock()
                    .await
                    .as_ref()
                    .is_some_and(|s| s.id() == token);
                if still_current {
                    quotes.stop().await;
                    facts.stop().await;
                } else {
                    debug!(session = %token, "Skipping carousel teardown for superseded session");
                }
            }
            if let Some(tx) = outcome.take() {
                let _ = tx.send(result);
            }
            // Keep reading so the connection is released cleanly.
        }
    }

    if let Some(tx) = outcome.take() {
        debug!(session = %token, "Stream drained after supersession");
        let _ = tx.send(ExchangeOutcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CarouselItem, MockContentSource};
    use crate::protocol::ByteStream;
    use crate::transport::MockStreamOpener;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn record(json: &str) -> Bytes {
        Bytes::from(format!("data: {json}\n"))
    }

    fn complete_stream(chunks: Vec<Bytes>) -> ByteStream {
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }

    fn hello_chunks() -> Vec<Bytes> {
        vec![
            record(r#"{"type":"token","data":"Hel"}"#),
            record(r#"{"type":"token","data":"lo"}"#),
            record(
                r#"{"type":"sources","data":["FREUD-12"],"positions":[{"id":"FREUD-12","text":"..."}]}"#,
            ),
            record(r#"{"type":"done"}"#),
        ]
    }

    /// Hands out scripted answer streams in submission order.
    #[derive(Default)]
    struct QueuedOpener {
        streams: StdMutex<VecDeque<Result<ByteStream>>>,
    }

    impl QueuedOpener {
        fn with(streams: Vec<Result<ByteStream>>) -> Arc<Self> {
            Arc::new(Self {
                streams: StdMutex::new(streams.into()),
            })
        }
    }

    #[async_trait]
    impl StreamOpener for QueuedOpener {
        async fn open(&self, _request: &AskRequest) -> Result<ByteStream> {
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no stream scripted")))
        }
    }

    /// Mock source serving the same fixed page on every fetch; empty pages
    /// keep carousel renders from interleaving with exchange assertions.
    fn fixed_source(items: Vec<CarouselItem>) -> MockContentSource {
        let mut source = MockContentSource::new();
        source
            .expect_fetch()
            .returning(move |_, _, _, _| Ok(items.clone()));
        source
    }

    #[derive(Default)]
    struct RecordingRenderer {
        ops: StdMutex<Vec<RenderOp>>,
    }

    impl RecordingRenderer {
        fn exchange_ops(&self) -> Vec<RenderOp> {
            self.ops
                .lock()
                .unwrap()
                .iter()
                .filter(|op| {
                    !matches!(
                        op,
                        RenderOp::CarouselCard { .. } | RenderOp::CarouselProgress { .. }
                    )
                })
                .cloned()
                .collect()
        }

        fn appended_text(&self) -> String {
            self.ops
                .lock()
                .unwrap()
                .iter()
                .filter_map(|op| match op {
                    RenderOp::AppendText { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Renderer for RecordingRenderer {
        fn apply(&self, op: &RenderOp) {
            self.ops.lock().unwrap().push(op.clone());
        }
    }

    fn orchestrator(
        opener: Arc<dyn StreamOpener>,
        items: Vec<CarouselItem>,
    ) -> (Orchestrator, Arc<RecordingRenderer>) {
        let renderer = Arc::new(RecordingRenderer::default());
        let orchestrator = Orchestrator::new(
            opener,
            Arc::new(fixed_source(items)),
            Arc::clone(&renderer) as Arc<dyn Renderer>,
        );
        (orchestrator, renderer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_exchange_renders_in_order_and_completes() {
        let opener = QueuedOpener::with(vec![Ok(complete_stream(hello_chunks()))]);
        let (mut orchestrator, renderer) = orchestrator(opener, Vec::new());

        let outcome = orchestrator.submit(Persona::Freud, "What is repression?").await;
        let outcome = outcome.await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                answer: "Hello".to_string(),
                citation_ids: vec!["FREUD-12".to_string()],
            }
        );
        assert_eq!(
            orchestrator.current_state().await,
            Some(SessionState::Completed)
        );
        assert!(!orchestrator.is_panel_active().await, "carousels stopped");

        let ops = renderer.exchange_ops();
        assert!(matches!(ops[0], RenderOp::ThinkingPlaceholder { .. }));
        assert_eq!(ops[1], RenderOp::AnswerStarted);
        assert_eq!(renderer.appended_text(), "Hello");
        assert!(matches!(ops.last(), Some(RenderOp::Completed)));

        let export = orchestrator
            .export_last_exchange(ExportFormat::Markdown)
            .await
            .unwrap();
        assert!(export.contains("**Freud:** Hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_session_renders_nothing_after_supersession() {
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(8);
        let gated: ByteStream = Box::pin(ReceiverStream::new(rx));
        let opener = QueuedOpener::with(vec![
            Ok(gated),
            Ok(complete_stream(vec![
                record(r#"{"type":"token","data":"Second"}"#),
                record(r#"{"type":"done"}"#),
            ])),
        ]);
        let (mut orchestrator, renderer) = orchestrator(opener, Vec::new());

        let first = orchestrator.submit(Persona::Freud, "first").await;
        tokio::task::yield_now().await;

        let second = orchestrator.submit(Persona::Jung, "second").await;
        assert!(matches!(
            second.await.unwrap(),
            ExchangeOutcome::Completed { .. }
        ));

        // The stale stream now emits and ends without a terminal frame.
        tx.send(Ok(record(r#"{"type":"token","data":"STALE"}"#)))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(first.await.unwrap(), ExchangeOutcome::Cancelled);
        assert_eq!(renderer.appended_text(), "Second");
        assert!(
            !renderer
                .exchange_ops()
                .iter()
                .any(|op| matches!(op, RenderOp::Failed { .. })),
            "stale stream's synthesized error must not surface"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_surfaces_error_and_stops_carousels() {
        let mut opener = MockStreamOpener::new();
        opener
            .expect_open()
            .return_once(|_| Err(anyhow!("connection refused")));
        let (mut orchestrator, renderer) = orchestrator(
            Arc::new(opener),
            vec![CarouselItem {
                id: "Q1".to_string(),
                text: "quote".to_string(),
            }],
        );

        let outcome = orchestrator.submit(Persona::Freud, "q").await.await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Errored {
                message: "connection refused".to_string(),
            }
        );
        assert_eq!(
            orchestrator.current_state().await,
            Some(SessionState::Errored)
        );
        assert!(!orchestrator.is_panel_active().await);
        assert!(
            renderer
                .exchange_ops()
                .iter()
                .any(|op| matches!(op, RenderOp::Failed { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_stream_yields_errored_outcome() {
        let mut opener = MockStreamOpener::new();
        opener.expect_open().return_once(|_| {
            Ok(complete_stream(vec![record(
                r#"{"type":"token","data":"cut "}"#,
            )]))
        });
        let (mut orchestrator, _renderer) = orchestrator(Arc::new(opener), Vec::new());

        let outcome = orchestrator.submit(Persona::Freud, "q").await.await.unwrap();
        assert_eq!(
            outcome,
            ExchangeOutcome::Errored {
                message: "stream ended unexpectedly".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_panel_stops_feeds_and_suppresses_later_renders() {
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(8);
        let gated: ByteStream = Box::pin(ReceiverStream::new(rx));
        let opener = QueuedOpener::with(vec![Ok(gated)]);
        let (mut orchestrator, renderer) = orchestrator(
            opener,
            vec![
                CarouselItem {
                    id: "Q1".to_string(),
                    text: "quote one".to_string(),
                },
                CarouselItem {
                    id: "Q2".to_string(),
                    text: "quote two".to_string(),
                },
            ],
        );

        let outcome = orchestrator.submit(Persona::Jung, "q").await;
        assert!(orchestrator.is_panel_active().await);

        orchestrator.close_panel().await;
        assert!(!orchestrator.is_panel_active().await);

        tx.send(Ok(record(r#"{"type":"token","data":"quiet"}"#)))
            .await
            .unwrap();
        tx.send(Ok(record(r#"{"type":"done"}"#))).await.unwrap();
        drop(tx);

        // The stream still finishes and is recorded, just not surfaced.
        assert_eq!(
            outcome.await.unwrap(),
            ExchangeOutcome::Completed {
                answer: "quiet".to_string(),
                citation_ids: Vec::new(),
            }
        );
        assert_eq!(renderer.appended_text(), "");
        assert!(
            orchestrator
                .export_session(ExportFormat::Plain)
                .await
                .unwrap()
                .contains("quiet")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_sends_configured_request_knobs() {
        let mut opener = MockStreamOpener::new();
        opener
            .expect_open()
            .withf(|request| {
                request.database == Persona::Kuczynski
                    && request.question == "What is a concept?"
                    && request.model == "gpt-4o-mini"
                    && request.answer_length == "long"
                    && request.quote_count == 5
                    && request.enhanced_mode
            })
            .return_once(|_| Ok(complete_stream(vec![record(r#"{"type":"done"}"#)])));

        let renderer = Arc::new(RecordingRenderer::default());
        let mut orchestrator = Orchestrator::new(
            Arc::new(opener),
            Arc::new(fixed_source(Vec::new())),
            renderer as Arc<dyn Renderer>,
        )
        .with_settings(RequestSettings {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            enhanced_mode: true,
            answer_length: "long".to_string(),
            quote_count: 5,
        });

        let outcome = orchestrator
            .submit(Persona::Kuczynski, "What is a concept?")
            .await
            .await
            .unwrap();
        assert!(matches!(outcome, ExchangeOutcome::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_teardown_spares_a_superseding_sessions_feeds() {
        let opener = QueuedOpener::with(vec![Ok(complete_stream(hello_chunks()))]);
        let (mut orchestrator, _renderer) = orchestrator(opener, Vec::new());

        let first = orchestrator.submit(Persona::Freud, "first").await;

        // Park the pump between its terminal frame and its carousel
        // teardown by holding the quotes lock.
        let mut quotes = orchestrator.quotes.lock().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // A new submission lands in that window: it swaps the current
        // session and restarts the feed.
        *orchestrator.current.lock().await = Some(Session::new(Persona::Jung, "second"));
        quotes.start(Persona::Jung).await;
        drop(quotes);

        assert!(matches!(
            first.await.unwrap(),
            ExchangeOutcome::Completed { .. }
        ));
        assert!(
            orchestrator.quotes.lock().await.is_rotating(),
            "old pump must not stop the new session's rotation"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_export_collects_multiple_exchanges() {
        let opener = QueuedOpener::with(vec![
            Ok(complete_stream(hello_chunks())),
            Ok(complete_stream(vec![
                record(r#"{"type":"token","data":"Again"}"#),
                record(r#"{"type":"done"}"#),
            ])),
        ]);
        let (mut orchestrator, _renderer) = orchestrator(opener, Vec::new());

        orchestrator
            .submit(Persona::Freud, "first")
            .await
            .await
            .unwrap();
        orchestrator
            .submit(Persona::Freud, "second")
            .await
            .await
            .unwrap();

        let export = orchestrator
            .export_session(ExportFormat::Markdown)
            .await
            .unwrap();
        assert!(export.contains("Total Exchanges: 2"));
        assert!(export.contains("Hello"));
        assert!(export.contains("Again"));
    }
}
