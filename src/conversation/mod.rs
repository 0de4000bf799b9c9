//! Conversation turn processing.
//!
//! Every user message becomes a [`types::Turn`] and flows through:
//! 1. Classification: emergency, needs clarification, or clear
//! 2. Retrieval: knowledge index, then one web search if the index is empty
//! 3. Drafting: an answer grounded in the retrieved passages
//! 4. Quality review: caveats for weak evidence, tone review otherwise
//!
//! Emergency and clarification turns stop after step 1.

pub mod quality;
pub mod router;
pub mod types;

pub use router::ConversationRouter;
pub use types::{
    Classification, Domain, FinalAnswer, QueryCategory, RetrievalRequest, RetrievalResult,
    TurnOutcome, TurnReply, TurnRequest,
};
