//! LLM-backed query classifier.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::conversation::types::{Classification, Domain, HistoryEntry, QueryCategory};
use crate::error::GatewayError;
use crate::gateways::ClassificationGateway;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};

const GATEWAY: &str = "classifier";

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// How many prior messages are shown to the classifier.
const HISTORY_WINDOW: usize = 6;

/// Classifies queries with a single structured-output LLM call.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ClassificationGateway for LlmClassifier {
    async fn classify(
        &self,
        query: &str,
        location: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<Classification, GatewayError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(query, location, history)),
        ])
        .with_temperature(0.0)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| GatewayError::from_llm(GATEWAY, e))?;

        debug!(
            model = self.llm.model_name(),
            output_tokens = response.output_tokens,
            "Classification response received"
        );

        parse_classification(&response.content).inspect_err(|e| {
            warn!(raw_response = %response.content, error = %e, "Unusable classification");
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> String {
    let domains: Vec<&str> = Domain::VOCABULARY.iter().map(|d| d.label()).collect();
    format!(
        "You analyse messages sent to a Red Cross virtual assistant. Work out what the user \
         needs, their emotional state and their language.\n\n\
         Categories:\n\
         - \"emergency\": immediate danger, medical emergencies, severe distress, threats to basic safety\n\
         - \"needs_clarification\": you cannot tell what help is needed; give 2-3 short options the user can pick from\n\
         - \"clear\": you understand the need\n\n\
         Domains (pick one or more, or \"other\"): {}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"category\": \"...\", \"domains\": [\"...\"], \"language\": \"...\", \"emotional_state\": \"...\", \
         \"confidence\": 0.0, \"entities\": {{\"location\": \"...\"}}, \"clarification_options\": [\"...\"]}}\n\n\
         Rules:\n\
         - confidence is 0.0-1.0\n\
         - entities holds locations, dates, family size and other specifics\n\
         - clarification_options only for needs_clarification",
        domains.join(", ")
    )
}

fn build_user_prompt(query: &str, location: Option<&str>, history: &[HistoryEntry]) -> String {
    let mut prompt = String::with_capacity(512);

    if !history.is_empty() {
        prompt.push_str("Recent conversation:\n");
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        for msg in &history[start..] {
            let preview: String = msg.content.chars().take(200).collect();
            prompt.push_str(&format!("  {:?}: {}\n", msg.role, preview));
        }
        prompt.push('\n');
    }

    let query_preview: String = query.chars().take(1000).collect();
    prompt.push_str(&format!("Query: {}\n", query_preview));
    prompt.push_str(&format!("Location: {}", location.unwrap_or("Not provided")));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ClassificationResponse {
    category: String,
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    language: String,
    #[serde(default)]
    emotional_state: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    entities: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    clarification_options: Vec<String>,
}

fn invalid(reason: String) -> GatewayError {
    GatewayError::InvalidResponse {
        gateway: GATEWAY.to_string(),
        reason,
    }
}

fn parse_classification(raw: &str) -> Result<Classification, GatewayError> {
    let json_str = extract_json_object(raw);
    let response: ClassificationResponse = serde_json::from_str(&json_str)
        .map_err(|e| invalid(format!("JSON parse error: {e}")))?;

    let category = match response.category.trim().to_lowercase().as_str() {
        "clear" => QueryCategory::Clear,
        "needs_clarification" => QueryCategory::NeedsClarification,
        "emergency" => QueryCategory::Emergency,
        other => return Err(invalid(format!("unknown category: '{other}'"))),
    };

    let domains = response.domains.iter().map(|d| Domain::parse(d)).collect();

    let mut entities = BTreeMap::new();
    for (key, value) in response.entities {
        let value = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) if s.trim().is_empty() => continue,
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        entities.insert(key, value);
    }

    let language = if response.language.trim().is_empty() {
        "english".to_string()
    } else {
        response.language
    };
    let emotional_state = if response.emotional_state.trim().is_empty() {
        "unknown".to_string()
    } else {
        response.emotional_state
    };

    Ok(Classification::new(
        category,
        domains,
        language,
        emotional_state,
        response.confidence,
        entities,
        response.clarification_options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};

    #[test]
    fn system_prompt_lists_categories_and_domains() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("emergency"));
        assert!(prompt.contains("needs_clarification"));
        assert!(prompt.contains("Food & Clothing"));
        assert!(prompt.contains("Helpdesk & Social Support"));
    }

    #[test]
    fn user_prompt_includes_location_and_recent_history() {
        let history: Vec<HistoryEntry> = (0..10)
            .map(|i| ChatMessage::user(format!("message {i}")))
            .collect();
        let prompt = build_user_prompt("Where can I sleep tonight?", Some("Utrecht"), &history);
        assert!(prompt.contains("Location: Utrecht"));
        assert!(prompt.contains("Where can I sleep tonight?"));
        assert!(prompt.contains("message 9"));
        assert!(!prompt.contains("message 3"));
    }

    #[test]
    fn user_prompt_without_location() {
        let prompt = build_user_prompt("hi", None, &[]);
        assert!(prompt.contains("Location: Not provided"));
        assert!(!prompt.contains("Recent conversation"));
    }

    #[test]
    fn parse_clear_response() {
        let raw = r#"{"category": "clear", "domains": ["Food & Clothing"], "language": "english",
            "emotional_state": "worried", "confidence": 0.92,
            "entities": {"location": "Amsterdam", "family_size": 4}}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category(), QueryCategory::Clear);
        assert_eq!(c.domains(), &[Domain::FoodAndClothing]);
        assert_eq!(c.entities().get("family_size").map(String::as_str), Some("4"));
        assert_eq!(c.entities().get("location").map(String::as_str), Some("Amsterdam"));
        assert!((c.confidence() - 0.92).abs() < 0.001);
    }

    #[test]
    fn parse_clarification_response() {
        let raw = r#"```json
        {"category": "needs_clarification", "domains": [], "language": "english",
         "emotional_state": "uncertain", "confidence": 0.3, "entities": {},
         "clarification_options": ["Food or clothing", "Shelter", "Medical help"]}
        ```"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category(), QueryCategory::NeedsClarification);
        assert_eq!(c.clarification_options().len(), 3);
        assert_eq!(c.domains(), &[Domain::Other]);
    }

    #[test]
    fn parse_clarification_without_options_fails() {
        let raw = r#"{"category": "needs_clarification", "clarification_options": []}"#;
        let err = parse_classification(raw).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
        assert!(err.to_string().contains("clarification option"));
    }

    #[test]
    fn parse_unknown_category_fails() {
        let raw = r#"{"category": "urgent"}"#;
        assert!(parse_classification(raw).is_err());
    }

    #[test]
    fn parse_fills_defaults_and_drops_empty_entities() {
        let raw = r#"{"category": "emergency", "entities": {"location": "", "date": null}}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.language(), "english");
        assert_eq!(c.emotional_state(), "unknown");
        assert!(c.entities().is_empty());
    }

    struct MockLlm {
        response: Result<String, ()>,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-classifier"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(LlmError::AuthFailed {
                    provider: "mock".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn classifier_returns_emergency() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm {
            response: Ok(r#"{"category": "emergency", "domains": ["Health & Wellbeing"],
                "language": "english", "emotional_state": "panicked", "confidence": 0.97,
                "entities": {"location": "Rotterdam"}}"#
                .into()),
        }));
        let c = classifier
            .classify("I'm having chest pains", Some("Rotterdam"), &[])
            .await
            .unwrap();
        assert_eq!(c.category(), QueryCategory::Emergency);
    }

    #[tokio::test]
    async fn classifier_maps_rejected_credentials_to_configuration_error() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm { response: Err(()) }));
        let err = classifier.classify("hello", None, &[]).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn classifier_rejects_garbage() {
        let classifier = LlmClassifier::new(Arc::new(MockLlm {
            response: Ok("I think this is about food.".into()),
        }));
        let err = classifier.classify("food", None, &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
    }
}
