//! Quality gates and caveat wording applied before an answer leaves the router.

use crate::config::Thresholds;
use crate::conversation::types::RetrievalResult;

/// Modification recorded when the tone reviewer changed the draft.
pub const MOD_GUIDELINES_APPLIED: &str = "Applied inclusive language guidelines";
/// Modification recorded when the user is asked for more context.
pub const MOD_REQUESTED_CONTEXT: &str = "Requested more context";
/// Modification recorded for the low-completeness caveat.
pub const MOD_OVERVIEW_CAVEAT: &str = "Added quick overview caveat";
/// Modification recorded for the low-confidence caveat.
pub const MOD_CONTACT_CAVEAT: &str = "Added direct contact caveat";
/// Prefix of the modification entry recorded when review fails.
pub const REVIEW_ERROR_MARKER: &str = "Quality review error";

/// Which branch of quality review a draft takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGate {
    /// Both scores low, or no evidence at all.
    NeedsContext,
    LowCompleteness,
    LowConfidence,
    /// Neither score low; send to the tone reviewer.
    Review,
}

impl QualityGate {
    /// Pick the branch. Comparisons are strict, so a score equal to its
    /// threshold passes. Empty evidence always needs context.
    pub fn evaluate(evidence: &RetrievalResult, thresholds: &Thresholds) -> Self {
        if evidence.is_empty() {
            return Self::NeedsContext;
        }
        let low_completeness = evidence.completeness() < thresholds.completeness;
        let low_confidence = evidence.confidence() < thresholds.confidence;
        match (low_completeness, low_confidence) {
            (true, true) => Self::NeedsContext,
            (true, false) => Self::LowCompleteness,
            (false, true) => Self::LowConfidence,
            (false, false) => Self::Review,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NeedsContext => "needs_context",
            Self::LowCompleteness => "low_completeness",
            Self::LowConfidence => "low_confidence",
            Self::Review => "review",
        }
    }
}

/// Caveat wording, parameterised by who users should contact.
#[derive(Debug, Clone, Copy)]
pub struct Caveats<'a> {
    authority: &'a str,
}

impl<'a> Caveats<'a> {
    pub fn new(authority: &'a str) -> Self {
        Self { authority }
    }

    /// Prepend a request for more context.
    pub fn ask_for_context(&self, draft: &str) -> String {
        let caveat = "I need more context to answer your question. Could you tell me a bit more \
                      about your situation, for example where you are and what kind of help you \
                      are looking for?";
        prepend(caveat, draft)
    }

    /// Frame a partial answer as an overview and point at further resources.
    pub fn quick_overview(&self, draft: &str) -> String {
        let caveat = "Here is a quick overview of what I found. Do you want more detail?";
        let resources = format!(
            "Additional resources may be available. {} can point you to more options near you.",
            capitalize(self.authority)
        );
        format!("{}\n\n{resources}", prepend(caveat, draft))
    }

    /// Append a recommendation to confirm with the authoritative source.
    pub fn direct_contact(&self, draft: &str) -> String {
        let caveat = format!(
            "I am not fully certain this information is accurate or up to date. We recommend \
             contacting {} directly to confirm.",
            self.authority
        );
        append(draft, &caveat)
    }

    /// Append a verification request after a failed review.
    pub fn verify_with_office(&self, draft: &str) -> String {
        let caveat = format!(
            "Please verify this information with your local office of {} before acting on it.",
            self.authority
        );
        append(draft, &caveat)
    }
}

fn prepend(caveat: &str, draft: &str) -> String {
    let draft = draft.trim();
    if draft.is_empty() {
        caveat.to_string()
    } else {
        format!("{caveat}\n\n{draft}")
    }
}

fn append(draft: &str, caveat: &str) -> String {
    let draft = draft.trim();
    if draft.is_empty() {
        caveat.to_string()
    } else {
        format!("{draft}\n\n{caveat}")
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
