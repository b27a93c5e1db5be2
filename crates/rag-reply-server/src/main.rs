use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use rag_reply_server::cache::{connect_backend, TenantCache};
use rag_reply_server::config::Settings;
use rag_reply_server::database::{DbPool, PgRepository, Store};
use rag_reply_server::handlers::build_router;
use rag_reply_server::logging::init_logger;
use rag_reply_server::services::clock::SystemClock;
use rag_reply_server::services::i18n::Translator;
use rag_reply_server::services::retry::{RetryPolicy, TokioSleeper};
use rag_reply_server::services::{
    EmbeddingBackfill, EmbeddingProvider, EmbeddingService, LlmProvider, LlmService, Pipeline,
    RagService,
};
use rag_reply_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let _log_guard = init_logger(&settings.logging)?;

    info!("🚀 Starting RAG reply server...");

    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");
    if settings.database.run_migrations {
        db_pool.migrate().await?;
    }

    let store: Arc<dyn Store> = Arc::new(PgRepository::new(db_pool.clone()));

    let backend = connect_backend(&settings.cache).await;
    let cache = TenantCache::new(backend, &settings.cache);

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(EmbeddingService::new(settings.embedding.clone()));
    let llm: Arc<dyn LlmProvider> = Arc::new(LlmService::new(settings.llm.clone()));

    let rag_service = RagService::new(
        store.clone(),
        cache.clone(),
        embedder.clone(),
        llm,
        Translator::new(&settings.i18n.default_language),
        settings.rag.clone(),
    )
    .with_retry(RetryPolicy::from(&settings.retry), Arc::new(TokioSleeper))
    .with_llm_enabled(settings.llm.enabled);

    if !settings.llm.enabled {
        info!("LLM disabled, replies use canned text only");
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        cache.clone(),
        rag_service,
        &settings,
        Arc::new(SystemClock),
    ));

    spawn_lock_pruning(pipeline.clone(), settings.conversation.lock_prune_interval_secs);

    if settings.jobs.backfill_interval_secs > 0 {
        let backfill = EmbeddingBackfill::new(
            store.clone(),
            cache.clone(),
            embedder,
            settings.jobs.backfill_batch_size,
        );
        spawn_backfill(backfill, settings.jobs.backfill_interval_secs);
    }

    let app = build_router(AppState {
        store,
        cache,
        pipeline,
    });

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    info!("Server stopped");
    Ok(())
}

fn spawn_lock_pruning(pipeline: Arc<Pipeline>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            pipeline.prune_locks();
        }
    });
}

fn spawn_backfill(backfill: EmbeddingBackfill, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match backfill.backfill_missing_embeddings(None).await {
                Ok(0) => {}
                Ok(updated) => info!(updated, "Embedding backfill run finished"),
                Err(e) => error!(error = %e, "Embedding backfill run failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
