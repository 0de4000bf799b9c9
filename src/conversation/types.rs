//! Shared types for a conversation turn.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClassificationError, TurnError};
use crate::llm::ChatMessage;

/// A prior exchange in the conversation (`{role, content}`).
pub type HistoryEntry = ChatMessage;

// ── Turn request / reply ────────────────────────────────────────────

/// What a caller hands the router for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }
}

/// What the router hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub response: String,
    pub emergency: bool,
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_options: Option<Vec<String>>,
}

impl From<TurnOutcome> for TurnReply {
    fn from(outcome: TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Emergency { message } => Self {
                response: message,
                emergency: true,
                needs_clarification: false,
                clarification_options: None,
            },
            TurnOutcome::Clarification { message, options } => Self {
                response: message,
                emergency: false,
                needs_clarification: true,
                clarification_options: Some(options),
            },
            TurnOutcome::Answered(answer) => Self {
                response: answer.text,
                emergency: false,
                needs_clarification: false,
                clarification_options: None,
            },
        }
    }
}

// ── Turn state machine ──────────────────────────────────────────────

/// Stage of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Start,
    Classified,
    AwaitClarification,
    Emergency,
    Retrieving,
    QualityReview,
    Done,
}

impl TurnStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Classified => "classified",
            Self::AwaitClarification => "await_clarification",
            Self::Emergency => "emergency",
            Self::Retrieving => "retrieving",
            Self::QualityReview => "quality_review",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AwaitClarification | Self::Emergency | Self::Done)
    }

    pub fn can_transition_to(self, next: TurnStage) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::Classified)
                | (Self::Classified, Self::AwaitClarification)
                | (Self::Classified, Self::Emergency)
                | (Self::Classified, Self::Retrieving)
                | (Self::Retrieving, Self::QualityReview)
                | (Self::QualityReview, Self::Done)
        )
    }
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One user request moving through the router.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: Uuid,
    pub query: String,
    pub location: Option<String>,
    pub session_id: Option<String>,
    pub history: Vec<HistoryEntry>,
    stage: TurnStage,
}

impl Turn {
    pub fn new(request: TurnRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: request.message.trim().to_string(),
            location: request
                .location
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            session_id: request.session_id,
            history: request.history,
            stage: TurnStage::Start,
        }
    }

    pub fn stage(&self) -> TurnStage {
        self.stage
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: TurnStage) -> Result<(), TurnError> {
        if !self.stage.can_transition_to(next) {
            return Err(TurnError::InvalidTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(turn = %self.id, from = %self.stage, to = %next, "Turn transition");
        self.stage = next;
        Ok(())
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Clear,
    NeedsClarification,
    Emergency,
}

impl QueryCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::NeedsClarification => "needs_clarification",
            Self::Emergency => "emergency",
        }
    }
}

/// Closed vocabulary of assistance domains, plus `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Domain {
    WhereToGoFirst,
    Shelter,
    HealthAndWellbeing,
    Dentist,
    SafetyAndProtection,
    FoodAndClothing,
    Work,
    AsylumAndReturn,
    LegalAdvice,
    SearchMissingRelatives,
    Women,
    ChildrenAndYouth,
    CoursesAndActivities,
    Feedback,
    HelpdeskAndSocialSupport,
    Other,
}

impl Domain {
    /// Every named domain, excluding `Other`.
    pub const VOCABULARY: [Domain; 15] = [
        Self::WhereToGoFirst,
        Self::Shelter,
        Self::HealthAndWellbeing,
        Self::Dentist,
        Self::SafetyAndProtection,
        Self::FoodAndClothing,
        Self::Work,
        Self::AsylumAndReturn,
        Self::LegalAdvice,
        Self::SearchMissingRelatives,
        Self::Women,
        Self::ChildrenAndYouth,
        Self::CoursesAndActivities,
        Self::Feedback,
        Self::HelpdeskAndSocialSupport,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::WhereToGoFirst => "Where to go first",
            Self::Shelter => "Shelter",
            Self::HealthAndWellbeing => "Health & Wellbeing",
            Self::Dentist => "Dentist",
            Self::SafetyAndProtection => "Safety & Protection",
            Self::FoodAndClothing => "Food & Clothing",
            Self::Work => "Work",
            Self::AsylumAndReturn => "Asylum & Return",
            Self::LegalAdvice => "Legal Advice",
            Self::SearchMissingRelatives => "Search Missing Relatives",
            Self::Women => "Women",
            Self::ChildrenAndYouth => "Children & Youth",
            Self::CoursesAndActivities => "Courses & Activities",
            Self::Feedback => "Feedback",
            Self::HelpdeskAndSocialSupport => "Helpdesk & Social Support",
            Self::Other => "other",
        }
    }

    /// Lenient parse. Accepts labels in any case and a few short aliases;
    /// anything unrecognised is `Other`.
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        let alias = match key.as_str() {
            "food" | "clothing" | "foodclothing" => Some(Self::FoodAndClothing),
            "health" | "healthcare" | "healthwellbeing" | "medical" => {
                Some(Self::HealthAndWellbeing)
            }
            "safety" | "protection" | "domesticviolence" | "safetyprotection" => {
                Some(Self::SafetyAndProtection)
            }
            "asylum" | "refugees" | "asylumreturn" => Some(Self::AsylumAndReturn),
            "legal" | "legaladvice" => Some(Self::LegalAdvice),
            "children" | "youth" | "childrenyouth" => Some(Self::ChildrenAndYouth),
            "education" | "courses" | "coursesactivities" => Some(Self::CoursesAndActivities),
            "helpdesk" | "socialsupport" | "helpdesksocialsupport" => {
                Some(Self::HelpdeskAndSocialSupport)
            }
            "missingrelatives" | "searchmissingrelatives" => Some(Self::SearchMissingRelatives),
            _ => None,
        };
        if let Some(domain) = alias {
            return domain;
        }

        Self::VOCABULARY
            .into_iter()
            .find(|d| {
                let label: String = d
                    .label()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .collect();
                label == key
            })
            .unwrap_or(Self::Other)
    }
}

impl From<String> for Domain {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.label().to_string()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured understanding of a user query.
///
/// Construct through [`Classification::new`] so the clarification invariant
/// holds: options are non-empty exactly when the category is
/// `NeedsClarification`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    category: QueryCategory,
    domains: Vec<Domain>,
    language: String,
    emotional_state: String,
    confidence: f32,
    entities: BTreeMap<String, String>,
    clarification_options: Vec<String>,
}

impl Classification {
    pub fn new(
        category: QueryCategory,
        domains: Vec<Domain>,
        language: impl Into<String>,
        emotional_state: impl Into<String>,
        confidence: f32,
        entities: BTreeMap<String, String>,
        clarification_options: Vec<String>,
    ) -> Result<Self, ClassificationError> {
        let mut unique = Vec::with_capacity(domains.len());
        for domain in domains {
            if !unique.contains(&domain) {
                unique.push(domain);
            }
        }
        if unique.is_empty() {
            unique.push(Domain::Other);
        }

        let options: Vec<String> = clarification_options
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let clarification_options = match category {
            QueryCategory::NeedsClarification if options.is_empty() => {
                return Err(ClassificationError::MissingClarificationOptions);
            }
            QueryCategory::NeedsClarification => options,
            QueryCategory::Clear | QueryCategory::Emergency => Vec::new(),
        };

        Ok(Self {
            category,
            domains: unique,
            language: language.into(),
            emotional_state: emotional_state.into(),
            confidence: clamp_unit(confidence),
            entities,
            clarification_options,
        })
    }

    /// Shorthand for a clear query in English.
    pub fn clear(domains: Vec<Domain>, entities: BTreeMap<String, String>) -> Self {
        Self {
            category: QueryCategory::Clear,
            domains: if domains.is_empty() {
                vec![Domain::Other]
            } else {
                domains
            },
            language: "english".into(),
            emotional_state: "neutral".into(),
            confidence: 1.0,
            entities,
            clarification_options: Vec::new(),
        }
    }

    pub fn category(&self) -> QueryCategory {
        self.category
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn emotional_state(&self) -> &str {
        &self.emotional_state
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn entities(&self) -> &BTreeMap<String, String> {
        &self.entities
    }

    pub fn clarification_options(&self) -> &[String] {
        &self.clarification_options
    }

    /// Decide which path the turn takes.
    pub fn route(&self, turn: &Turn) -> Routed {
        match self.category {
            QueryCategory::Emergency => Routed::Emergency,
            QueryCategory::NeedsClarification => {
                Routed::Clarify(self.clarification_options.clone())
            }
            QueryCategory::Clear => {
                let mut entities = self.entities.clone();
                if let Some(location) = &turn.location {
                    entities
                        .entry("location".to_string())
                        .or_insert_with(|| location.clone());
                }
                Routed::Proceed(RetrievalRequest {
                    query: turn.query.clone(),
                    domains: self.domains.clone(),
                    entities,
                    language: self.language.clone(),
                })
            }
        }
    }
}

/// Routing decision taken from a classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Emergency,
    Clarify(Vec<String>),
    Proceed(RetrievalRequest),
}

// ── Retrieval ───────────────────────────────────────────────────────

/// What the retrieval and web-fallback collaborators are asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub domains: Vec<Domain>,
    pub entities: BTreeMap<String, String>,
    pub language: String,
}

impl RetrievalRequest {
    /// `Other` lifts the domain filter.
    pub fn is_unrestricted(&self) -> bool {
        self.domains.is_empty() || self.domains.contains(&Domain::Other)
    }

    pub fn location(&self) -> Option<&str> {
        self.entities.get("location").map(String::as_str)
    }
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub last_updated: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contact: BTreeMap<String, String>,
    #[serde(default = "default_domain")]
    pub domain: Domain,
    #[serde(default)]
    pub relevance: f32,
}

fn default_domain() -> Domain {
    Domain::Other
}

/// Ranked passages plus completeness and confidence, both in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    passages: Vec<Passage>,
    completeness: f32,
    confidence: f32,
}

impl RetrievalResult {
    /// Scores are clamped; an empty passage list forces completeness to 0.
    pub fn new(passages: Vec<Passage>, completeness: f32, confidence: f32) -> Self {
        let completeness = if passages.is_empty() {
            0.0
        } else {
            clamp_unit(completeness)
        };
        Self {
            passages,
            completeness,
            confidence: clamp_unit(confidence),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0.0, 0.0)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn completeness(&self) -> f32 {
        self.completeness
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Distinct source labels in rank order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for passage in &self.passages {
            if !sources.contains(&passage.source) {
                sources.push(passage.source.clone());
            }
        }
        sources
    }

    /// Passage with the most recent freshness date, if any carry one.
    pub fn freshest(&self) -> Option<&Passage> {
        self.passages
            .iter()
            .filter(|p| p.last_updated.is_some())
            .max_by_key(|p| p.last_updated)
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ── Answers ─────────────────────────────────────────────────────────

/// Where the evidence behind a draft came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Index,
    Web,
}

/// Generated text and the evidence it was derived from.
#[derive(Debug, Clone)]
pub struct DraftAnswer {
    pub text: String,
    pub evidence: RetrievalResult,
    pub source: EvidenceSource,
}

/// Terminal artifact of an answered turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalAnswer {
    pub text: String,
    pub modifications: Vec<String>,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_error: Option<String>,
    pub sources: Vec<String>,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Emergency { message: String },
    Clarification { message: String, options: Vec<String> },
    Answered(FinalAnswer),
}

impl TurnOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Emergency { .. } => "emergency",
            Self::Clarification { .. } => "clarification",
            Self::Answered(_) => "answered",
        }
    }
}
