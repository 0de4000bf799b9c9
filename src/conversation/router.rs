//! Conversation router — the per-turn state machine.
//!
//! Flow:
//! 1. Classify the query
//! 2. Branch on category: emergency and clarification end the turn here
//! 3. Retrieve evidence, falling back to web search once if the index is empty
//! 4. Draft an answer from the evidence
//! 5. Quality review: caveats for low scores, tone review otherwise
//!
//! Failures before quality review end the turn. Failures inside quality
//! review degrade to a caveated answer.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{EMERGENCY_NUMBER, RouterConfig};
use crate::conversation::quality::{
    Caveats, MOD_CONTACT_CAVEAT, MOD_GUIDELINES_APPLIED, MOD_OVERVIEW_CAVEAT,
    MOD_REQUESTED_CONTEXT, QualityGate, REVIEW_ERROR_MARKER,
};
use crate::conversation::types::{
    DraftAnswer, EvidenceSource, FinalAnswer, RetrievalRequest, Routed, Turn, TurnOutcome,
    TurnReply, TurnRequest, TurnStage,
};
use crate::error::TurnError;
use crate::gateways::{
    ClassificationGateway, DraftGateway, QualityReviewGateway, RetrievalGateway,
    WebFallbackGateway,
};

/// Heading shown above clarification options.
const CLARIFICATION_HEADING: &str = "To better help you, could you clarify if you mean:";

/// Routes one conversation turn through the collaborators.
pub struct ConversationRouter {
    config: Arc<RouterConfig>,
    classifier: Arc<dyn ClassificationGateway>,
    retriever: Arc<dyn RetrievalGateway>,
    web_fallback: Option<Arc<dyn WebFallbackGateway>>,
    drafter: Arc<dyn DraftGateway>,
    reviewer: Arc<dyn QualityReviewGateway>,
}

impl ConversationRouter {
    /// Create a router without web fallback.
    pub fn new(
        config: Arc<RouterConfig>,
        classifier: Arc<dyn ClassificationGateway>,
        retriever: Arc<dyn RetrievalGateway>,
        drafter: Arc<dyn DraftGateway>,
        reviewer: Arc<dyn QualityReviewGateway>,
    ) -> Self {
        Self {
            config,
            classifier,
            retriever,
            web_fallback: None,
            drafter,
            reviewer,
        }
    }

    /// Enable the single web-search attempt for empty index results.
    pub fn with_web_fallback(mut self, web_fallback: Arc<dyn WebFallbackGateway>) -> Self {
        self.web_fallback = Some(web_fallback);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Process a turn and shape the result for callers.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnReply, TurnError> {
        self.run_turn(request).await.map(TurnReply::from)
    }

    /// Process a turn end to end.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, TurnError> {
        let mut turn = Turn::new(request);
        if turn.query.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        info!(
            turn = %turn.id,
            session = turn.session_id.as_deref().unwrap_or("-"),
            history = turn.history.len(),
            "Processing turn"
        );

        let classification = self
            .classifier
            .classify(&turn.query, turn.location.as_deref(), &turn.history)
            .await
            .map_err(|e| {
                error!(turn = %turn.id, error = %e, "Classification failed");
                TurnError::Classification(e)
            })?;
        turn.advance(TurnStage::Classified)?;

        info!(
            turn = %turn.id,
            category = classification.category().label(),
            domains = ?classification.domains(),
            language = classification.language(),
            confidence = classification.confidence(),
            "Query classified"
        );

        let outcome = match classification.route(&turn) {
            Routed::Emergency => {
                turn.advance(TurnStage::Emergency)?;
                TurnOutcome::Emergency {
                    message: self.emergency_message(),
                }
            }
            Routed::Clarify(options) => {
                turn.advance(TurnStage::AwaitClarification)?;
                TurnOutcome::Clarification {
                    message: clarification_message(&options),
                    options,
                }
            }
            Routed::Proceed(request) => {
                turn.advance(TurnStage::Retrieving)?;
                let draft = self.retrieve_and_draft(&turn, &request).await?;
                turn.advance(TurnStage::QualityReview)?;
                let answer = self.quality_review(&turn, draft).await;
                turn.advance(TurnStage::Done)?;
                TurnOutcome::Answered(answer)
            }
        };

        info!(turn = %turn.id, outcome = outcome.label(), "Turn complete");
        Ok(outcome)
    }

    /// Fixed escalation text.
    pub fn emergency_message(&self) -> String {
        format!(
            "This seems urgent and like you need immediate assistance. Please contact the Red \
             Cross directly at {} to get help immediately. For any medical emergency please \
             call {}.",
            self.config.emergency_contact, EMERGENCY_NUMBER
        )
    }

    /// RETRIEVING: index first, one web attempt if the index is empty, then draft.
    async fn retrieve_and_draft(
        &self,
        turn: &Turn,
        request: &RetrievalRequest,
    ) -> Result<DraftAnswer, TurnError> {
        let mut evidence = self
            .retriever
            .retrieve(request)
            .await
            .map_err(TurnError::Retrieval)?;
        let mut source = EvidenceSource::Index;

        debug!(
            turn = %turn.id,
            passages = evidence.len(),
            completeness = evidence.completeness(),
            confidence = evidence.confidence(),
            "Index retrieval finished"
        );

        if evidence.is_empty()
            && let Some(web) = &self.web_fallback
        {
            info!(turn = %turn.id, "Index returned nothing, trying web fallback");
            evidence = web.search(request).await.map_err(TurnError::WebFallback)?;
            source = EvidenceSource::Web;
            debug!(turn = %turn.id, passages = evidence.len(), "Web fallback finished");
        }

        let text = if evidence.is_empty() {
            String::new()
        } else {
            self.drafter
                .compose(request, &evidence)
                .await
                .map_err(TurnError::Drafting)?
        };

        Ok(DraftAnswer {
            text,
            evidence,
            source,
        })
    }

    /// QUALITY_REVIEW: never fails; reviewer errors degrade to a caveat.
    async fn quality_review(&self, turn: &Turn, draft: DraftAnswer) -> FinalAnswer {
        let caveats = Caveats::new(&self.config.authority);
        let gate = QualityGate::evaluate(&draft.evidence, &self.config.thresholds);
        let sources = draft.evidence.sources();

        debug!(
            turn = %turn.id,
            gate = gate.label(),
            source = ?draft.source,
            "Quality gate selected"
        );

        let caveated = |text: String, modification: &str| FinalAnswer {
            text,
            modifications: vec![modification.to_string()],
            approved: false,
            review_error: None,
            sources: sources.clone(),
        };

        match gate {
            QualityGate::NeedsContext => {
                caveated(caveats.ask_for_context(&draft.text), MOD_REQUESTED_CONTEXT)
            }
            QualityGate::LowCompleteness => {
                caveated(caveats.quick_overview(&draft.text), MOD_OVERVIEW_CAVEAT)
            }
            QualityGate::LowConfidence => {
                caveated(caveats.direct_contact(&draft.text), MOD_CONTACT_CAVEAT)
            }
            QualityGate::Review => {
                match self
                    .reviewer
                    .review_tone(&draft.text, &self.config.guidelines)
                    .await
                {
                    Ok(reviewed) => {
                        let mut modifications = Vec::new();
                        if reviewed != draft.text {
                            modifications.push(MOD_GUIDELINES_APPLIED.to_string());
                        }
                        FinalAnswer {
                            text: reviewed,
                            modifications,
                            approved: true,
                            review_error: None,
                            sources,
                        }
                    }
                    Err(e) => {
                        warn!(
                            turn = %turn.id,
                            error = %e,
                            "Quality review failed, returning unreviewed draft"
                        );
                        FinalAnswer {
                            text: caveats.verify_with_office(&draft.text),
                            modifications: vec![format!("{REVIEW_ERROR_MARKER}: {e}")],
                            approved: false,
                            review_error: Some(e.to_string()),
                            sources,
                        }
                    }
                }
            }
        }
    }
}

fn clarification_message(options: &[String]) -> String {
    let list: Vec<String> = options.iter().map(|o| format!("- {o}")).collect();
    format!("{CLARIFICATION_HEADING}\n{}", list.join("\n"))
}
