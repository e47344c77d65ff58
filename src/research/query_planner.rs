//! `QueryPlanner` — transforms `(userQuery, priorLearnings) -> [SerpQuery]` (spec §4.4).

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::{Learning, ResearchResult, SerpQuery};

use super::json_extract::extract_json_object;
use super::llm_client::{ChatMessage, ChatParams, LLMClient, ResponseFormat};

const SYSTEM_PROMPT: &str = "You are an expert research assistant. Your goal is to be comprehensive, \
evidence-based, and to cite sources. Given a user's research query, generate focused SERP-style \
search queries that together would thoroughly answer it.";

pub struct QueryPlanner {
    llm: Arc<dyn LLMClient>,
}

#[derive(Deserialize)]
struct PlanResponseQuery {
    query: String,
    #[serde(default, rename = "researchGoal", alias = "research_goal")]
    research_goal: String,
}

#[derive(Deserialize)]
struct PlanResponse {
    #[serde(default)]
    queries: Vec<PlanResponseQuery>,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    pub async fn plan(
        &self,
        model_id: &str,
        user_query: &str,
        num_queries: u8,
        prior_learnings: &[Learning],
        cancel: &CancellationToken,
    ) -> ResearchResult<Vec<SerpQuery>> {
        let user_message = build_user_message(user_query, num_queries, prior_learnings);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_message)];
        let params = ChatParams {
            response_format: ResponseFormat::Json,
            ..ChatParams::default()
        };

        let completion = match self.llm.chat(model_id, &messages, &params, cancel).await {
            Ok(c) => c,
            Err(e) if e.is_recoverable_per_query() => {
                tracing::warn!(error = %e, "query planner LLM call failed, using direct-answer fallback");
                return Ok(fallback(user_query));
            }
            Err(e) => return Err(e),
        };

        let queries = parse_and_truncate(&completion.text, num_queries);
        if queries.is_empty() {
            tracing::warn!("query planner produced no usable queries, using direct-answer fallback");
            return Ok(fallback(user_query));
        }
        Ok(queries)
    }
}

fn build_user_message(user_query: &str, num_queries: u8, prior_learnings: &[Learning]) -> String {
    let mut msg = format!(
        "Research query: {user_query}\n\n\
         Generate up to {num_queries} distinct SERP search queries that would help answer this. \
         Respond with a JSON object of the exact shape \
         {{\"queries\": [{{\"query\": string, \"researchGoal\": string}}, ...]}} \
         with at most {num_queries} entries."
    );
    if !prior_learnings.is_empty() {
        msg.push_str("\n\nLearnings so far (avoid redundant queries):\n");
        for l in prior_learnings {
            msg.push_str("- ");
            msg.push_str(&l.content);
            msg.push('\n');
        }
    }
    msg
}

fn fallback(user_query: &str) -> Vec<SerpQuery> {
    vec![SerpQuery {
        query: user_query.to_string(),
        research_goal: "direct answer".to_string(),
    }]
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

fn parse_and_truncate(text: &str, num_queries: u8) -> Vec<SerpQuery> {
    let Some(value) = extract_json_object(text, "queries") else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_value::<PlanResponse>(value) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for q in parsed.queries {
        if q.query.trim().is_empty() {
            continue;
        }
        let key = normalize(&q.query);
        if !seen.insert(key) {
            continue;
        }
        out.push(SerpQuery {
            query: q.query,
            research_goal: if q.research_goal.trim().is_empty() {
                "general research".to_string()
            } else {
                q.research_goal
            },
        });
        if out.len() >= num_queries as usize {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::llm_client::ChatCompletion;
    use crate::core::ResearchError;
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

    struct FailingLlm;

    #[async_trait]
    impl LLMClient for FailingLlm {
        async fn chat(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _params: &ChatParams,
            _cancel: &CancellationToken,
        ) -> ResearchResult<ChatCompletion> {
            Err(ResearchError::Transient("boom".into()))
        }
    }

    #[tokio::test]
    async fn plans_and_truncates_to_requested_count() {
        let json = r#"{"queries": [
            {"query": "a", "researchGoal": "g1"},
            {"query": "b", "researchGoal": "g2"},
            {"query": "c", "researchGoal": "g3"}
        ]}"#;
        let planner = QueryPlanner::new(Arc::new(FixedLlm(json.to_string())));
        let out = planner
            .plan("model", "topic", 2, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].query, "a");
    }

    #[tokio::test]
    async fn dedups_by_normalized_query() {
        let json = r#"{"queries": [
            {"query": " A ", "researchGoal": "g1"},
            {"query": "a", "researchGoal": "g2"}
        ]}"#;
        let planner = QueryPlanner::new(Arc::new(FixedLlm(json.to_string())));
        let out = planner
            .plan("model", "topic", 5, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn malformed_json_falls_back_to_direct_answer() {
        let planner = QueryPlanner::new(Arc::new(FixedLlm("not json".to_string())));
        let out = planner
            .plan("model", "my topic", 3, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, vec![SerpQuery {
            query: "my topic".to_string(),
            research_goal: "direct answer".to_string(),
        }]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_direct_answer() {
        let planner = QueryPlanner::new(Arc::new(FailingLlm));
        let out = planner
            .plan("model", "my topic", 3, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].query, "my topic");
    }

    #[tokio::test]
    async fn unauthenticated_llm_failure_propagates_instead_of_falling_back() {
        struct UnauthenticatedLlm;
        #[async_trait]
        impl LLMClient for UnauthenticatedLlm {
            async fn chat(
                &self,
                _model_id: &str,
                _messages: &[ChatMessage],
                _params: &ChatParams,
                _cancel: &CancellationToken,
            ) -> ResearchResult<ChatCompletion> {
                Err(ResearchError::Unauthenticated("bad credentials".into()))
            }
        }
        let planner = QueryPlanner::new(Arc::new(UnauthenticatedLlm));
        let err = planner
            .plan("model", "my topic", 3, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn deterministic_planner_is_order_stable_across_calls() {
        let json = r#"{"queries": [{"query": "a", "researchGoal": "g"}, {"query": "b", "researchGoal": "g"}]}"#;
        let planner = QueryPlanner::new(Arc::new(FixedLlm(json.to_string())));
        let first = planner.plan("m", "q", 5, &[], &CancellationToken::new()).await.unwrap();
        let second = planner.plan("m", "q", 5, &[], &CancellationToken::new()).await.unwrap();
        assert_eq!(first, second);
    }
}
