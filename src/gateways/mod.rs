//! External collaborators the router depends on.
//!
//! Each trait is a narrow request/response boundary. The router only sees
//! these traits; the LLM-, index- and web-backed implementations below are
//! replaceable.

pub mod classifier;
pub mod drafting;
pub mod index;
pub mod review;
pub mod web;

pub use classifier::LlmClassifier;
pub use drafting::LlmDraftWriter;
pub use index::{KnowledgeIndex, KnowledgeDocument};
pub use review::LlmToneReviewer;
pub use web::WebSearchFallback;

use async_trait::async_trait;

use crate::config::Guidelines;
use crate::conversation::types::{Classification, HistoryEntry, RetrievalRequest, RetrievalResult};
use crate::error::GatewayError;

/// Understands a raw query.
#[async_trait]
pub trait ClassificationGateway: Send + Sync {
    async fn classify(
        &self,
        query: &str,
        location: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<Classification, GatewayError>;
}

/// Searches the knowledge index. Returns an empty result on no match; errors
/// only for transport or auth failures.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult, GatewayError>;
}

/// Secondary search used when the index has nothing. Same empty-on-no-match
/// contract as [`RetrievalGateway`].
#[async_trait]
pub trait WebFallbackGateway: Send + Sync {
    async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResult, GatewayError>;
}

/// Writes an answer from non-empty evidence.
#[async_trait]
pub trait DraftGateway: Send + Sync {
    async fn compose(
        &self,
        request: &RetrievalRequest,
        evidence: &RetrievalResult,
    ) -> Result<String, GatewayError>;
}

/// Reviews a draft for tone and inclusive language.
///
/// Fails with `Configuration` when `guidelines` is absent and with
/// `InvalidInput` when `draft` is empty.
#[async_trait]
pub trait QualityReviewGateway: Send + Sync {
    async fn review_tone(&self, draft: &str, guidelines: &Guidelines)
    -> Result<String, GatewayError>;
}
