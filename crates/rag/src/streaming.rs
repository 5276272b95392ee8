//! Streamed query execution
//!
//! Same stages as [`RagPipeline::query`], but the answer is yielded fragment by
//! fragment. Streamed responses are tracked and never cached. Cancelling the
//! token, or dropping the stream, stops the in-flight backend call; fragments
//! already yielded stay with the caller.

use crate::context::{Context, SourceView};
use crate::generator::{as_generation_failure, GenerationClient};
use crate::pipeline::{assemble_response, QueryMetadata, QueryRequest, QueryResponse, RagPipeline};
use crate::tracker::{QueryId, QueryTracker};
use async_stream::stream;
use futures::{Stream, StreamExt};
use ragforge_common::errors::{AppError, ErrorDetails};
use ragforge_common::metrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One event of a streamed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stage transition: retrieving, generating, cancelled
    Status { stage: String, message: String },
    /// Numbered sources, sent before the first fragment
    Sources { sources: Vec<SourceView> },
    /// A fragment of the answer
    Chunk { text: String },
    /// Citations extracted from the full answer, with final metadata
    Complete {
        answer: String,
        cited_indices: Vec<usize>,
        metadata: QueryMetadata,
    },
    Error { error: ErrorDetails },
}

impl StreamEvent {
    fn status(stage: &str, message: impl Into<String>) -> Self {
        StreamEvent::Status {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    fn error(err: &AppError) -> Self {
        StreamEvent::Error {
            error: ErrorDetails::from(err),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Complete { .. } | StreamEvent::Error { .. } => true,
            StreamEvent::Status { stage, .. } => stage == "cancelled",
            _ => false,
        }
    }
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Tracker registration that is abandoned unless explicitly completed
struct InFlight<'a> {
    tracker: Option<&'a QueryTracker>,
    id: Option<QueryId>,
}

impl<'a> InFlight<'a> {
    fn start(tracker: Option<&'a QueryTracker>, question: &str, strategy: &str) -> Self {
        let id = tracker.map(|t| t.start_query(question, strategy));
        Self { tracker, id }
    }

    fn finish(mut self, outcome: Result<&QueryResponse, &AppError>) {
        if let (Some(tracker), Some(id)) = (self.tracker, self.id.take()) {
            tracker.complete_query(id, outcome);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let (Some(tracker), Some(id)) = (self.tracker, self.id.take()) {
            tracker.abandon_query(id);
        }
    }
}

impl RagPipeline {
    /// Answer a question as a stream of events
    ///
    /// Ends with exactly one terminal event: `Complete`, `Error`, or a
    /// `cancelled` status.
    pub fn stream_query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> + Send + '_ {
        stream! {
            let start = Instant::now();

            let prepared = match self.prepare(&request) {
                Ok(prepared) => prepared,
                Err(e) => {
                    yield StreamEvent::error(&e);
                    return;
                }
            };
            let strategy = prepared.strategy.as_str();
            let in_flight = InFlight::start(
                self.tracker().map(|t| t.as_ref()),
                &prepared.question,
                strategy,
            );

            yield StreamEvent::status("retrieving", format!("Searching with {} strategy", strategy));

            let Some(plan) = cancellable(&cancel, self.plan_search(&prepared.question, prepared.strategy)).await else {
                yield cancelled(strategy, start);
                return;
            };

            let retrieval_start = Instant::now();
            let outcome = match cancellable(&cancel, self.searcher().retrieve(prepared.strategy, &plan.text, prepared.top_k)).await {
                None => {
                    yield cancelled(strategy, start);
                    return;
                }
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => {
                    in_flight.finish(Err(&e));
                    metrics::record_query(start.elapsed().as_secs_f64(), strategy, "error");
                    yield StreamEvent::error(&e);
                    return;
                }
            };
            let retrieval_ms = retrieval_start.elapsed().as_secs_f64() * 1000.0;

            yield StreamEvent::Sources {
                sources: SourceView::from_items(&outcome.items),
            };

            let context = Context::from_items(&outcome.items);
            let prompt = GenerationClient::build_prompt(&prepared.question, &context);
            yield StreamEvent::status("generating", format!("Generating answer from {} sources", context.len()));

            let generation_start = Instant::now();
            let mut fragments = match cancellable(&cancel, self.generator().stream_answer(&prompt, prepared.temperature)).await {
                None => {
                    yield cancelled(strategy, start);
                    return;
                }
                Some(Ok(fragments)) => fragments,
                Some(Err(e)) => {
                    in_flight.finish(Err(&e));
                    metrics::record_query(start.elapsed().as_secs_f64(), strategy, "error");
                    yield StreamEvent::error(&e);
                    return;
                }
            };

            let mut answer = String::new();
            loop {
                match cancellable(&cancel, fragments.next()).await {
                    None => {
                        debug!(chars = answer.len(), "Stream cancelled mid-answer");
                        yield cancelled(strategy, start);
                        return;
                    }
                    Some(None) => break,
                    Some(Some(Ok(text))) => {
                        answer.push_str(&text);
                        yield StreamEvent::Chunk { text };
                    }
                    Some(Some(Err(e))) => {
                        let e = as_generation_failure(e);
                        warn!(error = %e, "Answer stream failed");
                        in_flight.finish(Err(&e));
                        metrics::record_query(start.elapsed().as_secs_f64(), strategy, "error");
                        yield StreamEvent::error(&e);
                        return;
                    }
                }
            }

            let generation = self.generator().finish(&prompt, answer, generation_start.elapsed());
            let response = assemble_response(&prepared, plan, &outcome, generation, retrieval_ms, start);

            in_flight.finish(Ok(&response));
            metrics::record_query(start.elapsed().as_secs_f64(), strategy, "success");
            info!(strategy, total_ms = response.metadata.total_ms, "Streamed query completed");

            yield StreamEvent::Complete {
                answer: response.answer,
                cited_indices: response.cited_indices,
                metadata: response.metadata,
            };
        }
    }
}

fn cancelled(strategy: &str, start: Instant) -> StreamEvent {
    metrics::record_query(start.elapsed().as_secs_f64(), strategy, "cancelled");
    info!(strategy, "Streamed query cancelled");
    StreamEvent::status("cancelled", "Query cancelled by caller")
}
