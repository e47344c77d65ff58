//! `ResultProcessor` — extracts learnings and follow-up questions from one
//! query's search results (spec §4.5).

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::{FollowUpQuestion, ResearchResult, SearchDoc};

use super::json_extract::extract_json_object;
use super::llm_client::{ChatMessage, ChatParams, LLMClient, ResponseFormat};

const SYSTEM_PROMPT: &str = "You are an expert research assistant. Your goal is to be comprehensive, \
evidence-based, and to cite sources. Extract only information-dense, verifiable findings.";

/// Per-document content is trimmed before concatenation; the whole block is
/// then trimmed again to the model's context budget.
const MAX_CHARS_PER_DOC: usize = 25_000;
const MAX_CONTENT_BLOCK_CHARS: usize = 150_000;
const MAX_LEARNING_CHARS: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub learnings: Vec<String>,
    pub follow_up_questions: Vec<FollowUpQuestion>,
}

pub struct ResultProcessor {
    llm: Arc<dyn LLMClient>,
}

#[derive(Deserialize)]
struct FollowUpJson {
    query: String,
    #[serde(default)]
    goal: String,
}

#[derive(Deserialize, Default)]
struct ProcessResponse {
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default, rename = "followUpQuestions", alias = "follow_up_questions")]
    follow_up_questions: Vec<FollowUpJson>,
}

impl ResultProcessor {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    pub async fn process(
        &self,
        model_id: &str,
        query: &str,
        docs: &[SearchDoc],
        num_learnings: usize,
        num_follow_ups: usize,
        cancel: &CancellationToken,
    ) -> ResearchResult<ProcessOutcome> {
        let content_block = build_content_block(docs);
        if content_block.trim().is_empty() {
            return Ok(ProcessOutcome::default());
        }

        let user_message = build_user_message(query, &content_block, num_learnings, num_follow_ups);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_message)];
        let params = ChatParams {
            response_format: ResponseFormat::Json,
            ..ChatParams::default()
        };

        let completion = match self.llm.chat(model_id, &messages, &params, cancel).await {
            Ok(c) => c,
            Err(e) if e.is_recoverable_per_query() => {
                tracing::warn!(error = %e, query, "result processor LLM call failed, returning no learnings");
                return Ok(ProcessOutcome::default());
            }
            Err(e) => return Err(e),
        };

        Ok(parse_and_truncate(&completion.text, num_learnings, num_follow_ups))
    }
}

fn build_content_block(docs: &[SearchDoc]) -> String {
    let mut block = String::new();
    for doc in docs {
        let raw = if !doc.main_text.trim().is_empty() {
            &doc.main_text
        } else {
            &doc.snippet
        };
        let trimmed = truncate_chars(raw.trim(), MAX_CHARS_PER_DOC);
        if trimmed.is_empty() {
            continue;
        }
        block.push_str(&format!("### {}\n{}\n\n", doc.url, trimmed));
        if block.len() >= MAX_CONTENT_BLOCK_CHARS {
            break;
        }
    }
    truncate_chars(&block, MAX_CONTENT_BLOCK_CHARS)
}

fn build_user_message(query: &str, content_block: &str, num_learnings: usize, num_follow_ups: usize) -> String {
    format!(
        "Query: {query}\n\nSearch result content:\n{content_block}\n\n\
         Extract up to {num_learnings} information-dense learnings and up to {num_follow_ups} \
         follow-up questions that would deepen the research. Respond with a JSON object of the \
         exact shape {{\"learnings\": [string, ...], \"followUpQuestions\": [{{\"query\": string, \
         \"goal\": string}}, ...]}}."
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn truncate_learning(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= MAX_LEARNING_CHARS {
        trimmed.to_string()
    } else {
        let mut truncated: String = trimmed.chars().take(MAX_LEARNING_CHARS.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}

fn parse_and_truncate(text: &str, num_learnings: usize, num_follow_ups: usize) -> ProcessOutcome {
    let Some(value) = extract_json_object(text, "learnings") else {
        return ProcessOutcome::default();
    };
    let Ok(parsed) = serde_json::from_value::<ProcessResponse>(value) else {
        return ProcessOutcome::default();
    };

    let mut seen_learnings = std::collections::HashSet::new();
    let mut learnings = Vec::new();
    for l in parsed.learnings {
        if l.trim().is_empty() {
            continue;
        }
        let truncated = truncate_learning(&l);
        let key = truncated.to_lowercase();
        if !seen_learnings.insert(key) {
            continue;
        }
        learnings.push(truncated);
        if learnings.len() >= num_learnings {
            break;
        }
    }

    let mut seen_follow_ups = std::collections::HashSet::new();
    let mut follow_up_questions = Vec::new();
    for f in parsed.follow_up_questions {
        if f.query.trim().is_empty() {
            continue;
        }
        let key = f.query.trim().to_lowercase();
        if !seen_follow_ups.insert(key) {
            continue;
        }
        follow_up_questions.push(FollowUpQuestion {
            query: f.query,
            goal: if f.goal.trim().is_empty() { "follow-up".to_string() } else { f.goal },
        });
        if follow_up_questions.len() >= num_follow_ups {
            break;
        }
    }

    ProcessOutcome { learnings, follow_up_questions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::llm_client::ChatCompletion;
    use async_trait::async_trait;

    struct FixedLlm(String);

    #[async_trait]
    impl LLMClient for FixedLlm {
        async fn chat(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _params: &ChatParams,
            _cancel: &CancellationToken,
        ) -> ResearchResult<ChatCompletion> {
            Ok(ChatCompletion { text: self.0.clone() })
        }
    }

    fn doc(url: &str, main_text: &str) -> SearchDoc {
        SearchDoc {
            url: url.to_string(),
            title: "t".to_string(),
            snippet: "s".to_string(),
            main_text: main_text.to_string(),
            rank: 0,
        }
    }

    #[tokio::test]
    async fn empty_docs_skip_llm_entirely() {
        let processor = ResultProcessor::new(Arc::new(FixedLlm("should not be read".to_string())));
        let out = processor
            .process("m", "q", &[], 5, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.learnings.is_empty());
        assert!(out.follow_up_questions.is_empty());
    }

    #[tokio::test]
    async fn parses_learnings_and_follow_ups() {
        let json = r#"{"learnings": ["Fact one.", "Fact two."], "followUpQuestions": [{"query": "q2", "goal": "g2"}]}"#;
        let processor = ResultProcessor::new(Arc::new(FixedLlm(json.to_string())));
        let docs = vec![doc("https://a.example", "some content")];
        let out = processor
            .process("m", "q", &docs, 5, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.learnings, vec!["Fact one.", "Fact two."]);
        assert_eq!(out.follow_up_questions[0].query, "q2");
    }

    #[tokio::test]
    async fn truncates_overlong_learning_with_ellipsis() {
        let long = "x".repeat(600);
        let json = serde_json::json!({"learnings": [long], "followUpQuestions": []}).to_string();
        let processor = ResultProcessor::new(Arc::new(FixedLlm(json)));
        let docs = vec![doc("https://a.example", "content")];
        let out = processor
            .process("m", "q", &docs, 5, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.learnings[0].chars().count(), MAX_LEARNING_CHARS);
        assert!(out.learnings[0].ends_with('…'));
    }

    #[tokio::test]
    async fn dedups_learnings_case_insensitively() {
        let json = r#"{"learnings": ["Same Fact", "same fact", "Different"], "followUpQuestions": []}"#;
        let processor = ResultProcessor::new(Arc::new(FixedLlm(json.to_string())));
        let docs = vec![doc("https://a.example", "content")];
        let out = processor
            .process("m", "q", &docs, 5, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.learnings.len(), 2);
    }

    #[tokio::test]
    async fn malformed_json_yields_empty_outcome() {
        let processor = ResultProcessor::new(Arc::new(FixedLlm("garbage".to_string())));
        let docs = vec![doc("https://a.example", "content")];
        let out = processor
            .process("m", "q", &docs, 5, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.learnings.is_empty());
        assert!(out.follow_up_questions.is_empty());
    }

    #[test]
    fn content_block_prefers_main_text_over_snippet() {
        let docs = vec![SearchDoc {
            url: "https://a.example".into(),
            title: "t".into(),
            snippet: "snippet text".into(),
            main_text: "main text body".into(),
            rank: 0,
        }];
        let block = build_content_block(&docs);
        assert!(block.contains("main text body"));
        assert!(!block.contains("snippet text"));
    }
}
