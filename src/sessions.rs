//! Session store — in-memory per-session conversation history.
//!
//! Sessions are created on first use, keep at most `max_history` entries and
//! are dropped after sitting idle for `idle_timeout`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::conversation::types::HistoryEntry;
use crate::llm::ChatMessage;

#[derive(Debug, Clone)]
struct Session {
    history: Vec<HistoryEntry>,
    last_active: DateTime<Utc>,
}

/// In-memory history keyed by session id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// History for a session, oldest first. Unknown sessions have none.
    pub async fn history(&self, session_id: &str) -> Vec<HistoryEntry> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Append a user message and the assistant reply, trimming the oldest
    /// entries past the cap.
    pub async fn record_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                history: Vec::new(),
                last_active: Utc::now(),
            });

        session.history.push(ChatMessage::user(user));
        session.history.push(ChatMessage::assistant(assistant));
        let overflow = session.history.len().saturating_sub(self.config.max_history);
        if overflow > 0 {
            session.history.drain(..overflow);
        }
        session.last_active = Utc::now();

        debug!(session_id, entries = session.history.len(), "Session updated");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle since before `now - idle_timeout`. Returns how many
    /// were removed.
    pub async fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let Ok(idle) = chrono::Duration::from_std(self.config.idle_timeout) else {
            return 0;
        };
        let cutoff = now - idle;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Pruned idle sessions");
        }
        removed
    }
}

/// Periodically drop idle sessions.
pub fn spawn_prune_task(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            store.prune_idle(Utc::now()).await;
        }
    })
}
