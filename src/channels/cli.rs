//! CLI channel — stdin/stdout REPL for local testing.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::conversation::{ConversationRouter, TurnRequest};
use crate::conversation::types::HistoryEntry;
use crate::llm::ChatMessage;

const EXIT_COMMANDS: [&str; 3] = ["quit", "exit", "q"];

const APOLOGY: &str =
    "Sorry, I couldn't process that message. Please try again or contact support.";

/// Interactive chat on the terminal. History is kept for the whole session.
pub struct CliChannel {
    router: Arc<ConversationRouter>,
    max_history: usize,
}

impl CliChannel {
    pub fn new(router: Arc<ConversationRouter>, max_history: usize) -> Self {
        Self {
            router,
            max_history,
        }
    }

    /// Run on stdin/stdout until EOF or an exit command.
    pub async fn run(&self) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run_with(stdin, stdout).await
    }

    async fn run_with<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut history: Vec<HistoryEntry> = Vec::new();

        writer
            .write_all(b"Red Cross assistant. Type 'quit' to exit.\n\nYou: ")
            .await?;
        writer.flush().await?;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            };
            let line = line.trim();

            if EXIT_COMMANDS.contains(&line.to_lowercase().as_str()) {
                writer.write_all(b"Goodbye!\n").await?;
                break;
            }
            if line.is_empty() {
                writer.write_all(b"You: ").await?;
                writer.flush().await?;
                continue;
            }

            let request = TurnRequest::new(line).with_history(history.clone());
            let output = match self.router.process_turn(request).await {
                Ok(reply) => {
                    history.push(ChatMessage::user(line));
                    history.push(ChatMessage::assistant(reply.response.clone()));
                    let overflow = history.len().saturating_sub(self.max_history);
                    history.drain(..overflow);
                    format!("\nAssistant: {}\n\nYou: ", reply.response)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Turn failed");
                    format!("\n{APOLOGY}\n\nYou: ")
                }
            };
            writer.write_all(output.as_bytes()).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}
