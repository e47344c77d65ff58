pub mod config;
pub mod error;
pub mod types;

pub use config::{load_research_config, ResearchConfig};
pub use error::{ResearchError, ResearchResult};
pub use types::*;
