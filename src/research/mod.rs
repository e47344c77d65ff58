pub mod engine;
pub mod json_extract;
pub mod llm_client;
pub mod query_planner;
pub mod rate_limiter;
pub mod report_writer;
pub mod result_processor;
pub mod search_client;

pub use engine::{validate_options, EventReceiver, ResearchEngine};
pub use llm_client::{
    ChatCompletion, ChatMessage, ChatParams, CredentialsReloadHook, HttpLlmClient, LLMClient,
    NoopCredentialsReload, ResponseFormat, Role,
};
pub use query_planner::QueryPlanner;
pub use rate_limiter::{AcquireOutcome, RateLimiter};
pub use report_writer::ReportWriter;
pub use result_processor::{ProcessOutcome, ResultProcessor};
pub use search_client::{extract_domain, HttpSearchClient, SearchClient, SearchOutcome};
