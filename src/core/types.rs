use serde::{Deserialize, Serialize};

/// Options captured once per research session, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOptions {
    pub is_deep: bool,
    pub depth: u8,
    pub breadth: u8,
    pub model_id: String,
    pub max_concurrency: usize,
}

impl ResearchOptions {
    /// Safety caps applied at construction (spec §6.3 `engine.maxDepth`/`maxBreadth`).
    pub fn clamp(mut self, max_depth: u8, max_breadth: u8) -> Self {
        self.depth = self.depth.clamp(1, max_depth);
        self.breadth = self.breadth.clamp(1, max_breadth);
        self.max_concurrency = self.max_concurrency.max(1);
        self
    }
}

/// A single SERP query produced by the `QueryPlanner`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerpQuery {
    pub query: String,
    pub research_goal: String,
}

/// One search-result document, in provider rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDoc {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub main_text: String,
    pub rank: usize,
}

/// A deduplicated, URL-keyed record of one web page consulted in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub relevance: f32,
}

/// A single information-dense sentence synthesized from search content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub content: String,
}

/// A follow-up query suggested by the result processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowUpQuestion {
    pub query: String,
    pub goal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DepthProgress {
    pub current: u8,
    pub total: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BreadthProgress {
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueriesProgress {
    pub current: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProgressDetails {
    pub depth: DepthProgress,
    pub breadth: BreadthProgress,
    pub queries: QueriesProgress,
}

/// Progress snapshot; last-writer semantics, always emitted as an owned copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: f64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ProgressDetails>,
}

impl ProgressSnapshot {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            progress: 0.0,
            status: status.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMetrics {
    pub total_time_seconds: f64,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOptions {
    pub is_deep: bool,
    pub depth: u8,
    pub breadth: u8,
    pub model_id: String,
}

impl From<&ResearchOptions> for StartOptions {
    fn from(o: &ResearchOptions) -> Self {
        Self {
            is_deep: o.is_deep,
            depth: o.depth,
            breadth: o.breadth,
            model_id: o.model_id.clone(),
        }
    }
}

/// Tagged-union event written to the `EventStream`, one JSON object per line.
///
/// Field names are plain `snake_case` (no camelCase rename layer) — this
/// crate's own convention for wire JSON, matching how the teacher's MCP
/// types (`core::types::SearchResult` etc.) serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    Start {
        query: String,
        options: StartOptions,
        timestamp: String,
    },
    Progress {
        progress: f64,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<ProgressDetails>,
    },
    SearchResults {
        content: String,
    },
    Sources {
        sources: Vec<Source>,
    },
    Learning {
        content: String,
    },
    Content {
        content: String,
    },
    Error {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<CompletionMetrics>,
    },
}
