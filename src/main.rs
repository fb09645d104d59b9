use std::sync::Arc;

use anyhow::Result;

use newscore::config::Config;
use newscore::embedding::gemini::GeminiEmbeddingProvider;
use newscore::embedding::local::HashingEmbeddingProvider;
use newscore::embedding::EmbeddingProvider;
use newscore::errors::NewscoreError;
use newscore::logging;
use newscore::service::NewsService;
use newscore::store::redis::RedisStore;
use newscore::store::IndexSchema;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    logging::init_logging(&config);

    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider.as_str() {
        "gemini" => Arc::new(GeminiEmbeddingProvider::new(
            config.embedding.gemini_api_key.clone().unwrap_or_default(),
            config.embedding.model.clone(),
            config.embedding.dimension,
        )?),
        "local" => Arc::new(HashingEmbeddingProvider::new(config.embedding.dimension)),
        other => {
            return Err(NewscoreError::Config(format!(
                "Unknown embedding provider '{}' (expected 'local' or 'gemini')",
                other
            ))
            .into());
        }
    };

    let store = Arc::new(
        RedisStore::connect(
            &config.redis_url,
            IndexSchema::articles(config.embedding.dimension),
        )
        .await?,
    );

    let service = NewsService::new(store, embedder, &config);
    service.ensure_index().await?;

    let health = service.health().await;
    tracing::info!(
        version = health.version,
        port = config.port,
        provider = %config.embedding.provider,
        dimension = config.embedding.dimension,
        "newscore ready"
    );
    Ok(())
}
