use std::sync::Arc;

use anyhow::Context;

use scribe_extraction::{EchoExtractor, Extractor, LogNotificationSink};
use scribe_infra::{
    GenerationService, GenerationServiceConfig, HttpExtractor, HttpIndexStore, PostgresMemoryStore,
};

fn main() -> anyhow::Result<()> {
    scribe_observability::init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        tracing::warn!("DATABASE_URL not set; using local dev default");
        "postgres://localhost:5432/scribe".to_string()
    });
    let index_url = std::env::var("INDEX_URL").unwrap_or_else(|_| {
        tracing::warn!("INDEX_URL not set; using local dev default");
        "http://localhost:9500".to_string()
    });
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let workers = std::env::var("WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);

    // The stores drive their I/O from the worker threads, so they are built
    // before (and outside) the server runtime.
    let relational =
        PostgresMemoryStore::connect(&database_url).context("failed to connect to database")?;
    let index = HttpIndexStore::new(&index_url).context("failed to build index client")?;
    let extractor: Arc<dyn Extractor> = match std::env::var("EXTRACTOR_URL") {
        Ok(url) => {
            Arc::new(HttpExtractor::new(url).context("failed to build extraction client")?)
        }
        Err(_) => {
            tracing::warn!("EXTRACTOR_URL not set; using pass-through extractor");
            Arc::new(EchoExtractor)
        }
    };

    let service = Arc::new(GenerationService::start(
        GenerationServiceConfig {
            workers,
            ..Default::default()
        },
        extractor,
        relational,
        index,
        LogNotificationSink,
    ));

    let app = scribe_api::app::build_app(service);

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        tracing::info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await.context("server error")
    })
}
