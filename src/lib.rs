pub mod core;
pub mod http;
pub mod research;

pub use core::*;
pub use http::AppState;
pub use research::{
    HttpLlmClient, HttpSearchClient, LLMClient, QueryPlanner, RateLimiter, ReportWriter,
    ResearchEngine, ResultProcessor, SearchClient,
};
