//! `ResearchEngine` — drives one session end-to-end and emits the event
//! stream (spec §4.7). Shallow mode does one search and one report; deep
//! mode expands a flat, breadth-first frontier of `(query, level)` pairs.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::{
    BreadthProgress, CompletionMetrics, DepthProgress, ErrorKind, EventRecord, Learning,
    ProgressDetails, QueriesProgress, ResearchError, ResearchOptions, ResearchResult, SerpQuery,
    Source, StartOptions,
};

use super::llm_client::LLMClient;
use super::query_planner::QueryPlanner;
use super::report_writer::ReportWriter;
use super::result_processor::{ProcessOutcome, ResultProcessor};
use super::search_client::{SearchClient, SearchOutcome};

pub type EventReceiver = mpsc::Receiver<EventRecord>;

/// Rejects an empty query and clamps depth/breadth to the configured caps
/// (spec §10.6, modelled on the teacher's `DeepResearchConfig` boundary).
pub fn validate_options(
    query: &str,
    options: ResearchOptions,
    max_depth: u8,
    max_breadth: u8,
) -> ResearchResult<(String, ResearchOptions)> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ResearchError::InvalidInput("query must not be empty".into()));
    }
    Ok((trimmed.to_string(), options.clamp(max_depth, max_breadth)))
}

#[derive(Default)]
struct SessionState {
    all_learnings: Vec<Learning>,
    sources: std::collections::HashMap<String, Source>,
    /// Normalized query strings already submitted to `SearchClient`.
    searched_queries: HashSet<String>,
    completed_queries: u32,
    total_queries: u32,
}

impl SessionState {
    fn add_sources(&mut self, incoming: Vec<Source>) -> Vec<Source> {
        let mut added = Vec::new();
        for s in incoming {
            if !self.sources.contains_key(&s.url) {
                self.sources.insert(s.url.clone(), s.clone());
                added.push(s);
            }
        }
        added
    }

    fn sources_vec(&self) -> Vec<Source> {
        self.sources.values().cloned().collect()
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

fn progress_fraction(completed: u32, total: u32) -> f64 {
    100.0 * completed as f64 / total.max(1) as f64
}

pub struct ResearchEngine {
    search: Arc<dyn SearchClient>,
    planner: QueryPlanner,
    processor: ResultProcessor,
    writer: ReportWriter,
}

impl ResearchEngine {
    pub fn new(search: Arc<dyn SearchClient>, llm: Arc<dyn LLMClient>) -> Self {
        Self {
            search,
            planner: QueryPlanner::new(llm.clone()),
            processor: ResultProcessor::new(llm.clone()),
            writer: ReportWriter::new(llm),
        }
    }

    /// Spawn one session as a background task. Returns the event stream and
    /// a token the caller can cancel to abort the session cooperatively.
    pub fn run(
        self: Arc<Self>,
        user_query: String,
        options: ResearchOptions,
        event_buffer_size: usize,
    ) -> (EventReceiver, CancellationToken) {
        let (tx, rx) = mpsc::channel(event_buffer_size.max(1));
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        tokio::spawn(async move {
            self.drive_session(user_query, options, tx, cancel_for_task).await;
        });
        (rx, cancel)
    }

    async fn drive_session(
        &self,
        user_query: String,
        options: ResearchOptions,
        tx: mpsc::Sender<EventRecord>,
        cancel: CancellationToken,
    ) {
        let start_time = Instant::now();
        tracing::info!(query = %user_query, is_deep = options.is_deep, "research session starting");

        send_event(
            &tx,
            EventRecord::Start {
                query: user_query.clone(),
                options: StartOptions::from(&options),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await;

        let state = Arc::new(Mutex::new(SessionState::default()));

        let outcome = if options.is_deep {
            self.run_deep(&user_query, &options, &state, &tx, &cancel).await
        } else {
            self.run_shallow(&user_query, &options, &state, &tx, &cancel).await
        };

        if cancel.is_cancelled() {
            tracing::info!(query = %user_query, "research session cancelled");
            send_event(
                &tx,
                EventRecord::Error { content: "session cancelled".into(), kind: Some(ErrorKind::Cancelled) },
            )
            .await;
            return;
        }

        match outcome {
            Ok(()) => {
                let (learnings, sources) = {
                    let s = state.lock().await;
                    (s.all_learnings.clone(), s.sources_vec())
                };
                let report = self
                    .writer
                    .write(&options.model_id, &user_query, &learnings, &sources, &cancel)
                    .await;
                send_event(&tx, EventRecord::Content { content: report }).await;
                send_event(
                    &tx,
                    EventRecord::Complete {
                        metrics: Some(CompletionMetrics {
                            total_time_seconds: start_time.elapsed().as_secs_f64(),
                            model_id: options.model_id.clone(),
                        }),
                    },
                )
                .await;
                tracing::info!(query = %user_query, "research session complete");
            }
            Err(ResearchError::Cancelled) => {
                send_event(
                    &tx,
                    EventRecord::Error { content: "session cancelled".into(), kind: Some(ErrorKind::Cancelled) },
                )
                .await;
            }
            Err(e) => {
                tracing::error!(query = %user_query, error = %e, "research session failed");
                send_event(&tx, EventRecord::Error { content: e.to_string(), kind: Some(ErrorKind::Fatal) }).await;
            }
        }
    }

    async fn run_shallow(
        &self,
        user_query: &str,
        options: &ResearchOptions,
        state: &Arc<Mutex<SessionState>>,
        tx: &mpsc::Sender<EventRecord>,
        cancel: &CancellationToken,
    ) -> ResearchResult<()> {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        let outcome = match self.search.search(user_query, cancel).await {
            Ok(o) => o,
            Err(e) if e.is_recoverable_per_query() => {
                tracing::warn!(error = %e, "shallow search failed, continuing with no results");
                SearchOutcome::default()
            }
            Err(e) => return Err(e),
        };

        send_event(tx, EventRecord::SearchResults { content: render_search_results_markdown(&outcome.docs) }).await;

        let new_sources = { state.lock().await.add_sources(outcome.sources.clone()) };
        if !new_sources.is_empty() {
            send_event(tx, EventRecord::Sources { sources: new_sources }).await;
        }

        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        let processed = match self
            .processor
            .process(&options.model_id, user_query, &outcome.docs, 5, 3, cancel)
            .await
        {
            Ok(p) => p,
            Err(e) if e.is_recoverable_per_query() => {
                tracing::warn!(error = %e, "shallow result processing failed, no learnings");
                ProcessOutcome::default()
            }
            Err(e) => return Err(e),
        };

        for l in &processed.learnings {
            let learning = Learning { content: l.clone() };
            state.lock().await.all_learnings.push(learning.clone());
            send_event(tx, EventRecord::Learning { content: learning.content }).await;
        }

        let (completed, total) = {
            let mut s = state.lock().await;
            s.completed_queries += 1;
            s.total_queries = s.total_queries.max(1);
            (s.completed_queries, s.total_queries)
        };
        send_event(
            tx,
            EventRecord::Progress {
                progress: progress_fraction(completed, total),
                status: "searching".into(),
                details: Some(ProgressDetails {
                    depth: DepthProgress { current: 1, total: 1 },
                    breadth: BreadthProgress { current: 1, total: 1 },
                    queries: QueriesProgress { current: completed, total, current_query: Some(user_query.to_string()) },
                }),
            },
        )
        .await;

        Ok(())
    }

    async fn run_deep(
        &self,
        user_query: &str,
        options: &ResearchOptions,
        state: &Arc<Mutex<SessionState>>,
        tx: &mpsc::Sender<EventRecord>,
        cancel: &CancellationToken,
    ) -> ResearchResult<()> {
        let depth_total = options.depth;
        let breadth_cap = options.breadth;
        let num_learnings = (5 / depth_total as usize).max(2);
        let num_follow_ups = (3 / depth_total as usize).max(1);
        let max_concurrency = options.max_concurrency.max(1);

        let mut frontier: VecDeque<(String, u8)> = VecDeque::new();
        frontier.push_back((user_query.to_string(), 1));

        let mut current_level = 1u8;
        while current_level <= depth_total && !frontier.is_empty() {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }

            let mut level_nodes = Vec::new();
            while matches!(frontier.front(), Some((_, lvl)) if *lvl == current_level) {
                level_nodes.push(frontier.pop_front().unwrap().0);
            }
            if level_nodes.is_empty() {
                break;
            }

            for node_query in &level_nodes {
                if cancel.is_cancelled() {
                    return Err(ResearchError::Cancelled);
                }

                let prior_learnings = { state.lock().await.all_learnings.clone() };
                let planned = match self
                    .planner
                    .plan(&options.model_id, node_query, breadth_cap, &prior_learnings, cancel)
                    .await
                {
                    Ok(p) => p,
                    Err(e) if e.is_recoverable_per_query() => {
                        tracing::warn!(error = %e, query = %node_query, "planning failed for node, skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if planned.is_empty() {
                    continue;
                }

                let breadth_total = planned.len() as u32;
                { state.lock().await.total_queries += breadth_total; }

                let follow_up_batches: Vec<ResearchResult<Vec<SerpQuery>>> = stream::iter(planned.into_iter().enumerate())
                    .map(|(idx, sq)| {
                        self.process_subquery(
                            sq,
                            idx as u32,
                            breadth_total,
                            current_level,
                            depth_total,
                            &options.model_id,
                            num_learnings,
                            num_follow_ups,
                            state,
                            tx,
                            cancel,
                        )
                    })
                    .buffer_unordered(max_concurrency)
                    .collect()
                    .await;

                // A non-recoverable failure (e.g. `Unauthenticated`/`Fatal`)
                // inside one sub-query aborts the whole session per spec §7,
                // even though the other sub-queries in this batch already
                // ran to completion.
                for batch in &follow_up_batches {
                    if let Err(e) = batch {
                        return Err(e.clone());
                    }
                }

                if current_level < depth_total {
                    for batch in follow_up_batches {
                        for f in batch.unwrap_or_default() {
                            frontier.push_back((f.query, current_level + 1));
                        }
                    }
                }
            }

            current_level += 1;
        }

        Ok(())
    }

    /// Search, process, and emit events for one planned SERP query. Returns
    /// the follow-up questions to enqueue at the next level (empty if the
    /// sub-query failed, was a duplicate, or the level cap was reached).
    /// Returns `Err` only for a non-recoverable failure (spec §7:
    /// `Unauthenticated`/`Fatal`), which the caller treats as session-fatal.
    #[allow(clippy::too_many_arguments)]
    async fn process_subquery(
        &self,
        sq: SerpQuery,
        idx: u32,
        breadth_total: u32,
        level: u8,
        depth_total: u8,
        model_id: &str,
        num_learnings: usize,
        num_follow_ups: usize,
        state: &Arc<Mutex<SessionState>>,
        tx: &mpsc::Sender<EventRecord>,
        cancel: &CancellationToken,
    ) -> ResearchResult<Vec<SerpQuery>> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let (completed_before, total_before) = {
            let s = state.lock().await;
            (s.completed_queries, s.total_queries)
        };
        send_event(
            tx,
            EventRecord::Progress {
                progress: progress_fraction(completed_before, total_before),
                status: "searching".into(),
                details: Some(ProgressDetails {
                    depth: DepthProgress { current: level, total: depth_total },
                    breadth: BreadthProgress { current: idx + 1, total: breadth_total },
                    queries: QueriesProgress {
                        current: completed_before,
                        total: total_before,
                        current_query: Some(sq.query.clone()),
                    },
                }),
            },
        )
        .await;

        let already_searched = {
            let mut s = state.lock().await;
            !s.searched_queries.insert(normalize(&sq.query))
        };
        if already_searched {
            // `total_queries` was already bumped by `breadth_total` before
            // dedup was known; back it out so it (and `completed_queries`)
            // only ever counts distinct sub-queries actually searched.
            let mut s = state.lock().await;
            s.total_queries = s.total_queries.saturating_sub(1);
            return Ok(Vec::new());
        }

        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let search_outcome = match self.search.search(&sq.query, cancel).await {
            Ok(o) => o,
            Err(e) => {
                if !e.is_recoverable_per_query() {
                    return Err(e);
                }
                tracing::warn!(error = %e, query = %sq.query, "search failed for sub-query, skipping");
                state.lock().await.completed_queries += 1;
                return Ok(Vec::new());
            }
        };

        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let new_sources = { state.lock().await.add_sources(search_outcome.sources.clone()) };
        if !new_sources.is_empty() {
            send_event(tx, EventRecord::Sources { sources: new_sources }).await;
        }

        let processed = match self
            .processor
            .process(model_id, &sq.query, &search_outcome.docs, num_learnings, num_follow_ups, cancel)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                if !e.is_recoverable_per_query() {
                    return Err(e);
                }
                tracing::warn!(error = %e, query = %sq.query, "result processing failed, no learnings");
                ProcessOutcome::default()
            }
        };

        for l in &processed.learnings {
            let learning = Learning { content: l.clone() };
            state.lock().await.all_learnings.push(learning.clone());
            send_event(tx, EventRecord::Learning { content: learning.content }).await;
        }

        let (completed_after, total_after) = {
            let mut s = state.lock().await;
            s.completed_queries += 1;
            (s.completed_queries, s.total_queries)
        };
        send_event(
            tx,
            EventRecord::Progress {
                progress: progress_fraction(completed_after, total_after),
                status: "searching".into(),
                details: Some(ProgressDetails {
                    depth: DepthProgress { current: level, total: depth_total },
                    breadth: BreadthProgress { current: idx + 1, total: breadth_total },
                    queries: QueriesProgress { current: completed_after, total: total_after, current_query: None },
                }),
            },
        )
        .await;

        Ok(processed
            .follow_up_questions
            .into_iter()
            .map(|f| SerpQuery { query: f.query, research_goal: f.goal })
            .collect())
    }
}

async fn send_event(tx: &mpsc::Sender<EventRecord>, event: EventRecord) {
    let _ = tx.send(event).await;
}

fn render_search_results_markdown(docs: &[crate::core::SearchDoc]) -> String {
    let mut md = String::new();
    for doc in docs.iter().take(5) {
        md.push_str(&format!("### [{}]({})\n{}\n\n", doc.title, doc.url, doc.snippet));
    }
    md
}
