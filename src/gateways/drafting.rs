//! LLM-backed answer drafting from retrieved passages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::conversation::types::{RetrievalRequest, RetrievalResult};
use crate::error::GatewayError;
use crate::gateways::DraftGateway;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const GATEWAY: &str = "drafting";

const DRAFT_MAX_TOKENS: u32 = 1024;

/// Writes answers that only use what the passages say.
pub struct LlmDraftWriter {
    llm: Arc<dyn LlmProvider>,
}

impl LlmDraftWriter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl DraftGateway for LlmDraftWriter {
    async fn compose(
        &self,
        request: &RetrievalRequest,
        evidence: &RetrievalResult,
    ) -> Result<String, GatewayError> {
        if evidence.is_empty() {
            return Err(GatewayError::InvalidInput {
                gateway: GATEWAY.to_string(),
                reason: "no passages to draft from".to_string(),
            });
        }

        let llm_request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(request, evidence)),
            ChatMessage::user(request.query.clone()),
        ])
        .with_temperature(0.0)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let response = self
            .llm
            .complete(llm_request)
            .await
            .map_err(|e| GatewayError::from_llm(GATEWAY, e))?;

        let text = response.content.trim().to_string();
        if text.is_empty() {
            return Err(GatewayError::InvalidResponse {
                gateway: GATEWAY.to_string(),
                reason: "empty draft".to_string(),
            });
        }

        debug!(chars = text.len(), passages = evidence.len(), "Draft composed");
        Ok(text)
    }
}

fn build_system_prompt(request: &RetrievalRequest, evidence: &RetrievalResult) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You are a helpful Red Cross assistant. Answer the user using only the retrieved \
         information below. If it is incomplete, say so and suggest contacting the Red Cross \
         directly. Mention the source and date of the information when you use it.\n\n",
    );
    prompt.push_str(&format!("Language to use: {}\n\n", request.language));

    prompt.push_str("Retrieved information:\n");
    for (i, passage) in evidence.passages().iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i + 1, passage.text));
        prompt.push_str(&format!("    Source: {}", passage.source));
        if let Some(date) = passage.last_updated {
            prompt.push_str(&format!(" (updated {})", date));
        }
        prompt.push('\n');
        if !passage.contact.is_empty() {
            let contact: Vec<String> = passage
                .contact
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            prompt.push_str(&format!("    Contact: {}\n", contact.join(", ")));
        }
    }

    if let Some(latest) = evidence.freshest()
        && let Some(date) = latest.last_updated
    {
        prompt.push_str(&format!(
            "\nMost recent source: {} (updated {}). Prefer its contact details.\n",
            latest.source, date
        ));
    }

    prompt.push_str(&format!(
        "\nLocation: {}\n",
        request.location().unwrap_or("Not specified")
    ));
    let others: Vec<String> = request
        .entities
        .iter()
        .filter(|(k, _)| k.as_str() != "location")
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    if !others.is_empty() {
        prompt.push_str(&format!("Other details: {}\n", others.join(", ")));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::conversation::types::{Domain, Passage};
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};

    fn request() -> RetrievalRequest {
        let mut entities = BTreeMap::new();
        entities.insert("location".to_string(), "Amsterdam".to_string());
        entities.insert("family_size".to_string(), "4".to_string());
        RetrievalRequest {
            query: "Where can I get food assistance?".into(),
            domains: vec![Domain::FoodAndClothing],
            entities,
            language: "dutch".into(),
        }
    }

    fn evidence() -> RetrievalResult {
        let mut contact = BTreeMap::new();
        contact.insert("phone".to_string(), "555-0123".to_string());
        RetrievalResult::new(
            vec![Passage {
                text: "Food assistance is available on Mainstreet.".into(),
                source: "RC Food Services Guide".into(),
                last_updated: NaiveDate::from_ymd_opt(2024, 1, 15),
                contact,
                domain: Domain::FoodAndClothing,
                relevance: 0.8,
            }],
            0.33,
            0.9,
        )
    }

    #[test]
    fn prompt_carries_passages_and_metadata() {
        let prompt = build_system_prompt(&request(), &evidence());
        assert!(prompt.contains("Language to use: dutch"));
        assert!(prompt.contains("Food assistance is available on Mainstreet."));
        assert!(prompt.contains("Source: RC Food Services Guide (updated 2024-01-15)"));
        assert!(prompt.contains("phone: 555-0123"));
        assert!(prompt.contains("Most recent source: RC Food Services Guide (updated 2024-01-15)"));
        assert!(prompt.contains("Location: Amsterdam"));
        assert!(prompt.contains("family_size: 4"));
    }

    struct MockLlm(&'static str);

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-drafter"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn compose_trims_output() {
        let writer = LlmDraftWriter::new(Arc::new(MockLlm("  Go to Mainstreet.  \n")));
        let text = writer.compose(&request(), &evidence()).await.unwrap();
        assert_eq!(text, "Go to Mainstreet.");
    }

    #[tokio::test]
    async fn compose_rejects_empty_evidence_and_output() {
        let writer = LlmDraftWriter::new(Arc::new(MockLlm("")));
        let err = writer
            .compose(&request(), &RetrievalResult::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));

        let err = writer.compose(&request(), &evidence()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
    }
}
