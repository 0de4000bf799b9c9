use std::sync::Arc;

use aid_assist::channels::http::{self, ChatState};
use aid_assist::channels::CliChannel;
use aid_assist::config::AppConfig;
use aid_assist::error::Result;
use aid_assist::conversation::ConversationRouter;
use aid_assist::gateways::{
    KnowledgeIndex, LlmClassifier, LlmDraftWriter, LlmToneReviewer, WebSearchFallback,
};
use aid_assist::llm::create_provider;
use aid_assist::sessions::{self, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    eprintln!("🩹 Aid Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Chat API: http://0.0.0.0:{}/chat", config.server.port);
    eprintln!(
        "   Thresholds: completeness {}, confidence {}",
        config.router.thresholds.completeness, config.router.thresholds.confidence
    );
    if !config.router.guidelines.is_present() {
        eprintln!("   Guidelines: not configured (answers will carry a verification caveat)");
    }

    let llm = create_provider(&config.llm)?;

    // ── Knowledge index ─────────────────────────────────────────────────
    let index = match &config.corpus_path {
        Some(path) => KnowledgeIndex::from_json_file(path).await?,
        None => KnowledgeIndex::sample(),
    };
    eprintln!("   Knowledge index: {} documents", index.len().await);

    // ── Router ──────────────────────────────────────────────────────────
    let mut router = ConversationRouter::new(
        Arc::new(config.router.clone()),
        Arc::new(LlmClassifier::new(llm.clone())),
        Arc::new(index),
        Arc::new(LlmDraftWriter::new(llm.clone())),
        Arc::new(LlmToneReviewer::new(llm.clone())),
    );
    if config.web_fallback {
        router = router.with_web_fallback(Arc::new(WebSearchFallback::new(llm.clone())));
        eprintln!("   Web fallback: enabled");
    } else {
        eprintln!("   Web fallback: disabled");
    }
    let router = Arc::new(router);

    // ── Sessions + HTTP ─────────────────────────────────────────────────
    let session_store = SessionStore::new(config.sessions.clone());
    let _prune_handle = sessions::spawn_prune_task(session_store.clone());

    let state = ChatState {
        router: router.clone(),
        sessions: session_store,
    };
    let port = config.server.port;
    let server = tokio::spawn(async move {
        if let Err(e) = http::serve(state, port).await {
            tracing::error!(port, error = %e, "Chat server stopped");
        }
    });

    if config.server.headless {
        eprintln!("   Mode: headless\n");
        if let Err(e) = server.await {
            tracing::error!(error = %e, "Chat server task failed");
        }
    } else {
        eprintln!();
        CliChannel::new(router, config.sessions.max_history)
            .run()
            .await?;
    }

    Ok(())
}
