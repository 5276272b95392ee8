//! Per-query instrumentation
//!
//! Tracks in-flight queries, keeps session aggregates and a bounded ring of
//! recent query events. Nothing is persisted.

use crate::context::preview;
use crate::pipeline::QueryResponse;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ragforge_common::errors::{AppError, ErrorDetails};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Handle returned by [`QueryTracker::start_query`]
pub type QueryId = Uuid;

/// Recent events kept in memory
pub const EVENT_RING_CAPACITY: usize = 256;

const ANSWER_PREVIEW_CHARS: usize = 500;

/// One finished (or cache-served) query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvent {
    pub query_id: QueryId,
    pub question: String,
    pub strategy: String,
    pub success: bool,
    pub cached: bool,
    pub error: Option<ErrorDetails>,
    pub latency_ms: f64,
    pub tokens_used: usize,
    pub estimated_cost: f64,
    pub num_sources: usize,
    pub answer_preview: Option<String>,
    pub cited_indices: Vec<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Session aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Completed queries, cache hits and failures included
    pub total_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Running average over queries that were not served from cache
    pub avg_latency_ms: f64,
    pub avg_cost_per_query: f64,
    pub avg_tokens_per_query: f64,
}

struct ActiveQuery {
    question: String,
    strategy: String,
    started: Instant,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<QueryId, ActiveQuery>,
    events: VecDeque<QueryEvent>,
    total_queries: u64,
    failed_queries: u64,
    cache_hits: u64,
    total_tokens: u64,
    total_cost: f64,
    timed_queries: u64,
    avg_latency_ms: f64,
}

impl TrackerState {
    fn push(&mut self, event: QueryEvent) {
        if self.events.len() == EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// In-process query tracker, safe to share between concurrent queries
#[derive(Default)]
pub struct QueryTracker {
    state: Mutex<TrackerState>,
}

impl QueryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query that is about to run
    pub fn start_query(&self, question: &str, strategy: &str) -> QueryId {
        let id = Uuid::new_v4();
        self.state.lock().active.insert(
            id,
            ActiveQuery {
                question: question.to_string(),
                strategy: strategy.to_string(),
                started: Instant::now(),
            },
        );
        debug!(query_id = %id, strategy, "Query started");
        id
    }

    /// Record the outcome of a started query; unknown ids are ignored
    pub fn complete_query(&self, id: QueryId, outcome: Result<&QueryResponse, &AppError>) {
        let mut state = self.state.lock();
        let Some(active) = state.active.remove(&id) else {
            return;
        };
        let latency_ms = active.started.elapsed().as_secs_f64() * 1000.0;

        let (tokens_used, estimated_cost, num_sources) = match outcome {
            Ok(response) => (
                response.metadata.tokens_used,
                response.metadata.estimated_cost,
                response.sources.len(),
            ),
            Err(_) => (0, 0.0, 0),
        };

        state.total_queries += 1;
        state.total_tokens += tokens_used as u64;
        state.total_cost += estimated_cost;
        state.timed_queries += 1;
        let n = state.timed_queries as f64;
        state.avg_latency_ms = (state.avg_latency_ms * (n - 1.0) + latency_ms) / n;
        if outcome.is_err() {
            state.failed_queries += 1;
        }

        let event = QueryEvent {
            query_id: id,
            question: active.question,
            strategy: active.strategy,
            success: outcome.is_ok(),
            cached: false,
            error: outcome.err().map(ErrorDetails::from),
            latency_ms,
            tokens_used,
            estimated_cost,
            num_sources,
            answer_preview: outcome.ok().map(|r| preview(&r.answer, ANSWER_PREVIEW_CHARS)),
            cited_indices: outcome.map(|r| r.cited_indices.clone()).unwrap_or_default(),
            timestamp: Utc::now(),
        };

        info!(
            query_id = %id,
            strategy = %event.strategy,
            success = event.success,
            latency_ms,
            tokens_used,
            estimated_cost,
            "Query completed"
        );
        state.push(event);
    }

    /// Forget a started query without counting it (caller went away)
    pub fn abandon_query(&self, id: QueryId) {
        if self.state.lock().active.remove(&id).is_some() {
            debug!(query_id = %id, "Query abandoned");
        }
    }

    /// Record a query served from cache
    pub fn log_cache_hit(&self, question: &str, strategy: &str) {
        let mut state = self.state.lock();
        state.total_queries += 1;
        state.cache_hits += 1;

        state.push(QueryEvent {
            query_id: Uuid::new_v4(),
            question: question.to_string(),
            strategy: strategy.to_string(),
            success: true,
            cached: true,
            error: None,
            latency_ms: 0.0,
            tokens_used: 0,
            estimated_cost: 0.0,
            num_sources: 0,
            answer_preview: None,
            cited_indices: Vec::new(),
            timestamp: Utc::now(),
        });
    }

    /// Queries started but not yet completed
    pub fn in_flight(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn session_metrics(&self) -> SessionMetrics {
        let state = self.state.lock();
        let per_query = |total: f64| {
            if state.total_queries > 0 {
                total / state.total_queries as f64
            } else {
                0.0
            }
        };

        SessionMetrics {
            total_queries: state.total_queries,
            failed_queries: state.failed_queries,
            cache_hits: state.cache_hits,
            cache_hit_rate: per_query(state.cache_hits as f64),
            total_tokens: state.total_tokens,
            total_cost: state.total_cost,
            avg_latency_ms: state.avg_latency_ms,
            avg_cost_per_query: per_query(state.total_cost),
            avg_tokens_per_query: per_query(state.total_tokens as f64),
        }
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> Vec<QueryEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Clear aggregates and events; in-flight queries keep running
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let active = std::mem::take(&mut state.active);
        *state = TrackerState {
            active,
            ..TrackerState::default()
        };
    }
}
