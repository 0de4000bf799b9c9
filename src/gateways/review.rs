//! LLM-backed tone and inclusive-language review.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Guidelines;
use crate::error::GatewayError;
use crate::gateways::QualityReviewGateway;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const GATEWAY: &str = "review";

const REVIEW_MAX_TOKENS: u32 = 1024;

/// Rewrites drafts so they follow the communication guidelines.
pub struct LlmToneReviewer {
    llm: Arc<dyn LlmProvider>,
}

impl LlmToneReviewer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QualityReviewGateway for LlmToneReviewer {
    async fn review_tone(
        &self,
        draft: &str,
        guidelines: &Guidelines,
    ) -> Result<String, GatewayError> {
        let Some(guidelines) = guidelines.text() else {
            return Err(GatewayError::Configuration {
                gateway: GATEWAY.to_string(),
                reason: "communication guidelines are not configured".to_string(),
            });
        };
        if draft.trim().is_empty() {
            return Err(GatewayError::InvalidInput {
                gateway: GATEWAY.to_string(),
                reason: "draft is empty".to_string(),
            });
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(guidelines)),
            ChatMessage::user(format!("Review and improve this response:\n\n{draft}")),
        ])
        .with_temperature(0.0)
        .with_max_tokens(REVIEW_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| GatewayError::from_llm(GATEWAY, e))?;

        let reviewed = response.content.trim().to_string();
        if reviewed.is_empty() {
            return Err(GatewayError::InvalidResponse {
                gateway: GATEWAY.to_string(),
                reason: "reviewer returned no text".to_string(),
            });
        }

        debug!(changed = reviewed != draft.trim(), "Tone review complete");
        Ok(reviewed)
    }
}

fn build_system_prompt(guidelines: &str) -> String {
    format!(
        "You review responses written by a Red Cross assistant. Make sure each response:\n\
         1. Uses inclusive, respectful language\n\
         2. Is culturally sensitive\n\
         3. Is clear and simple\n\
         4. Follows the communication guidelines below\n\n\
         Keep the facts, sources and contact details unchanged. Return only the improved \
         response text.\n\n\
         Communication guidelines:\n{guidelines}"
    )
}
