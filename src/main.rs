use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use recommendi_api::{
    config::Config,
    db::{create_pool, create_redis_client, run_migrations, Cache, PgRecommendationStore, PgSessionStore},
    routes::{create_router, AppState},
    services::{
        geocoding::GoogleGeocoder, llm::openai::OpenAiClient, providers::qloo::QlooProvider,
        Collaborators, RecommendationService,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to the database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client).await;

    let llm = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_api_url.clone(),
        config.openai_model.clone(),
    ));
    let collaborators = Collaborators {
        provider: Arc::new(QlooProvider::new(
            cache.clone(),
            config.qloo_api_key.clone(),
            config.qloo_api_url.clone(),
        )),
        intents: llm.clone(),
        scorer: llm,
        geocoder: Arc::new(GoogleGeocoder::new(cache, config.google_api_key.clone())),
    };

    let service = RecommendationService::new(
        collaborators,
        Arc::new(PgSessionStore::new(pool.clone())),
        Arc::new(PgRecommendationStore::new(pool)),
        config.pipeline_settings(),
    );
    let tracker = service.tracker().clone();

    let app = create_router(AppState::new(service), config.api_prefix());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, prefix = config.api_prefix(), "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracker.shutdown().await;
    cache_writer.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
