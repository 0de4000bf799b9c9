//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Anthropic rejects requests without an explicit token budget.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter wrapping any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }

    fn classify_error(&self, reason: String) -> LlmError {
        let lower = reason.to_lowercase();
        if lower.contains("401")
            || lower.contains("authentication")
            || lower.contains("api key")
            || lower.contains("api-key")
        {
            LlmError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else if lower.contains("429") || lower.contains("rate limit") {
            LlmError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: None,
            }
        } else {
            LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

/// Split our flat message list into rig's (preamble, history, prompt) shape.
///
/// System messages are concatenated into the preamble; the last non-system
/// message becomes the prompt.
fn split_messages(
    messages: Vec<ChatMessage>,
) -> Result<(Option<String>, Vec<Message>, Message), String> {
    let mut system_parts = Vec::new();
    let mut conversation = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content),
            Role::User => conversation.push(Message::user(msg.content)),
            Role::Assistant => conversation.push(Message::assistant(msg.content)),
        }
    }

    let prompt = conversation
        .pop()
        .ok_or_else(|| "request has no user or assistant message".to_string())?;
    let preamble = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    Ok((preamble, conversation, prompt))
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) =
            split_messages(request.messages).map_err(|reason| LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason,
            })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        builder = builder.max_tokens(u64::from(max_tokens));

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_error(e.to_string()))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let output_tokens = response.usage.output_tokens as u32;
        let finish_reason = if output_tokens >= max_tokens {
            FinishReason::Length
        } else if content.is_empty() {
            FinishReason::Unknown
        } else {
            FinishReason::Stop
        };

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens,
            finish_reason,
        })
    }
}
