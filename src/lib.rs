//! Aid Assist — conversational assistant for humanitarian aid questions.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateways;
pub mod llm;
pub mod sessions;
