//! `ReportWriter` — synthesizes the final Markdown report (spec §4.6).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{Learning, Source};

use super::llm_client::{ChatMessage, ChatParams, LLMClient, ResponseFormat};

const SYSTEM_PROMPT: &str = "You are an expert research assistant. Write a comprehensive, \
evidence-based Markdown report with exactly these sections, in this order: \
## Introduction, ## Main Findings, ## Analysis, ## Conclusion. Do not include a Sources section \
yourself — it will be appended mechanically. Cite claims against the learnings provided.";

pub struct ReportWriter {
    llm: Arc<dyn LLMClient>,
}

impl ReportWriter {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    /// Synthesize the report. Never fails: an LLM error falls back to a
    /// deterministic report built straight from the learnings (spec §4.6).
    pub async fn write(
        &self,
        model_id: &str,
        user_query: &str,
        learnings: &[Learning],
        sources: &[Source],
        cancel: &CancellationToken,
    ) -> String {
        let body = match self.write_with_llm(model_id, user_query, learnings, cancel).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "report writer LLM call failed, using deterministic fallback");
                fallback_body(user_query, learnings)
            }
        };

        format!("{}\n\n{}", body.trim_end(), sources_section(sources))
    }

    async fn write_with_llm(
        &self,
        model_id: &str,
        user_query: &str,
        learnings: &[Learning],
        cancel: &CancellationToken,
    ) -> crate::core::ResearchResult<String> {
        let mut user_message = format!("Research query: {user_query}\n\nLearnings gathered:\n");
        for l in learnings {
            user_message.push_str("- ");
            user_message.push_str(&l.content);
            user_message.push('\n');
        }
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_message)];
        let params = ChatParams { response_format: ResponseFormat::Text, ..ChatParams::default() };
        let completion = self.llm.chat(model_id, &messages, &params, cancel).await?;
        Ok(completion.text)
    }
}

fn fallback_body(user_query: &str, learnings: &[Learning]) -> String {
    let mut body = format!("# Research Report: {user_query}\n\n");
    if learnings.is_empty() {
        body.push_str("No learnings were collected for this query.\n");
    } else {
        for l in learnings {
            body.push_str("- ");
            body.push_str(&l.content);
            body.push('\n');
        }
    }
    body
}

fn sources_section(sources: &[Source]) -> String {
    let mut section = String::from("## Sources\n");
    if sources.is_empty() {
        return section;
    }
    for s in sources {
        section.push_str(&format!("- [{}]({})\n", if s.title.trim().is_empty() { &s.url } else { &s.title }, s.url));
    }
    section
}
