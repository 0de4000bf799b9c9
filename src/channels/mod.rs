//! Channels that carry user messages to the conversation router.

pub mod cli;
pub mod http;

pub use cli::CliChannel;
pub use http::{ChatState, chat_routes};
