/// Similar-article retrieval
///
/// Primary path embeds the target's keywords (or title) and runs a
/// thresholded vector KNN. When embedding or KNN fails, four independent
/// text/semantic/category/temporal strategies run in parallel and their
/// scores are fused; any individual strategy may fail without aborting the
/// fusion. Results are cached with a sidecar, LRU bookkeeping, and a
/// last-known-good tombstone for catastrophic failures.

pub mod strategies;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cache::{keys, CacheLayer, Envelope, Sidecar};
use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::NewscoreError;
use crate::index::IndexGateway;
use crate::model::{Article, RetrievalMethod, ScoredArticle};
use crate::store::{QueryNode, SearchOptions, TagField, TextField};
use strategies::{
    category_score, extract_ngrams, extract_semantic_terms, fuse, rank_score, temporal_score,
    StrategyResult, CATEGORY_WEIGHT, SEMANTIC_WEIGHT, TEMPORAL_WINDOW_DAYS, TEMPORAL_WEIGHT,
    TEXT_WEIGHT,
};

#[derive(Debug, Clone, Default)]
pub struct SimilarOptions {
    /// Skip the cache probe and recompute.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarResponse {
    pub articles: Vec<ScoredArticle>,
    pub total: u64,
    pub cached: bool,
    pub method: RetrievalMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<i64>,
    #[serde(default)]
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimilarResponse {
    fn empty() -> SimilarResponse {
        SimilarResponse {
            articles: Vec::new(),
            total: 0,
            cached: false,
            method: RetrievalMethod::Vector,
            cache_age_secs: None,
            fallback: false,
            error: None,
        }
    }
}

fn page(results: &[ScoredArticle], limit: usize, offset: usize) -> Vec<ScoredArticle> {
    results.iter().skip(offset).take(limit).cloned().collect()
}

pub struct SimilarityEngine {
    gateway: Arc<IndexGateway>,
    cache: Arc<CacheLayer>,
    embedder: Arc<dyn EmbeddingProvider>,
    cfg: SearchConfig,
}

impl SimilarityEngine {
    pub fn new(
        gateway: Arc<IndexGateway>,
        cache: Arc<CacheLayer>,
        embedder: Arc<dyn EmbeddingProvider>,
        cfg: SearchConfig,
    ) -> SimilarityEngine {
        SimilarityEngine {
            gateway,
            cache,
            embedder,
            cfg,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.config().similar_ttl_secs)
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.op_timeout_secs)
    }

    /// Articles similar to `article_id`. See the module docs for the path
    /// selection; a full-pipeline failure returns the tombstone fallback if
    /// one exists, else an empty result with `error` populated.
    pub async fn similar(
        &self,
        article_id: &str,
        limit: usize,
        offset: usize,
        opts: &SimilarOptions,
    ) -> Result<SimilarResponse, NewscoreError> {
        let payload_key = keys::similar(article_id, limit, offset);
        let sidecar_key = keys::similar_meta(article_id);
        let stats_key = keys::similar_stats(article_id);

        if !opts.force_refresh {
            if let Some((envelope, sidecar)) = self.cache.probe(&payload_key, &sidecar_key).await {
                self.cache.record_hit(&stats_key).await;
                let age = (Utc::now() - sidecar.timestamp).num_seconds().max(0);
                return Ok(SimilarResponse {
                    articles: page(&envelope.results, limit, offset),
                    total: sidecar.total_count,
                    cached: true,
                    method: envelope.method,
                    cache_age_secs: Some(age),
                    fallback: false,
                    error: None,
                });
            }
        }

        self.cache.record_miss(&stats_key).await;
        self.cache
            .mark_recent(&keys::similar_bloom(article_id), article_id, self.ttl())
            .await;

        match self.compute(article_id, limit, offset).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!(article_id, error = %e, "Similarity pipeline failed");
                if let Some(envelope) = self
                    .cache
                    .get_envelope(&keys::similar_fallback(article_id))
                    .await
                {
                    return Ok(SimilarResponse {
                        articles: page(&envelope.results, limit, offset),
                        total: envelope.results.len() as u64,
                        cached: true,
                        method: envelope.method,
                        cache_age_secs: Some(envelope.age_secs()),
                        fallback: true,
                        error: None,
                    });
                }
                let mut response = SimilarResponse::empty();
                response.error = Some(e.to_string());
                Ok(response)
            }
        }
    }

    async fn compute(
        &self,
        article_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<SimilarResponse, NewscoreError> {
        let Some(target) = self.gateway.get_article(article_id).await? else {
            return Ok(SimilarResponse::empty());
        };

        let want = limit + offset + self.cfg.knn_overshoot;
        let (results, method) = match self.vector_path(&target, want).await {
            Ok(results) => (results, RetrievalMethod::Vector),
            Err(e) => {
                tracing::warn!(
                    article_id,
                    error = %e,
                    "Vector similarity failed, using multi-strategy fallback"
                );
                (
                    self.fallback_path(&target, want).await?,
                    RetrievalMethod::Combined,
                )
            }
        };

        let total = results.len() as u64;
        let envelope = Envelope::new(results, method);
        let sidecar = Sidecar::new(total, method);
        self.cache
            .write(
                &keys::similar(article_id, limit, offset),
                &keys::similar_meta(article_id),
                &keys::similar_lru(),
                &envelope,
                &sidecar,
                self.ttl(),
            )
            .await;
        self.cache
            .put_envelope(
                &keys::similar_fallback(article_id),
                &envelope,
                self.ttl() * 24,
            )
            .await;
        self.cache
            .daily_unique(
                &keys::similar_unique(&Utc::now().format("%Y-%m-%d").to_string()),
                article_id,
            )
            .await;

        Ok(SimilarResponse {
            articles: page(&envelope.results, limit, offset),
            total,
            cached: false,
            method,
            cache_age_secs: None,
            fallback: false,
            error: None,
        })
    }

    /// Primary path: embed the search text and run a thresholded KNN.
    async fn vector_path(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<Vec<ScoredArticle>, NewscoreError> {
        let search_text = target.search_text();
        let vector = tokio::time::timeout(self.op_timeout(), self.embedder.embed(&search_text))
            .await
            .map_err(|_| NewscoreError::Internal("Embedding timed out".to_string()))??;

        let hits = self
            .gateway
            .vector_knn(&vector, want, None, Some(&target.id))
            .await?;

        let threshold = self.cfg.vector_similarity_threshold;
        Ok(hits
            .into_iter()
            .filter(|h| h.similarity >= threshold)
            .map(|h| ScoredArticle {
                score: h.similarity,
                similarity: Some(h.similarity),
                method: RetrievalMethod::Vector,
                matched_preference: None,
                preference_order: None,
                article: h.article,
            })
            .collect())
    }

    async fn run_strategy<F>(
        &self,
        name: &'static str,
        fut: F,
    ) -> Result<StrategyResult, NewscoreError>
    where
        F: Future<Output = Result<StrategyResult, NewscoreError>> + Send,
    {
        match tokio::time::timeout(self.op_timeout(), fut).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::warn!(strategy = name, error = %e, "Similarity strategy failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(strategy = name, "Similarity strategy timed out");
                Err(NewscoreError::Internal(format!(
                    "{} strategy timed out",
                    name
                )))
            }
        }
    }

    /// Fallback path: run all four strategies in parallel, tolerate
    /// individual failures, fuse scores in a temporary store-side sorted
    /// set, and hydrate the winners.
    async fn fallback_path(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<Vec<ScoredArticle>, NewscoreError> {
        type StrategyFuture<'a> =
            Pin<Box<dyn Future<Output = Result<StrategyResult, NewscoreError>> + Send + 'a>>;

        let futures: Vec<StrategyFuture<'_>> = vec![
            Box::pin(self.run_strategy("text", self.text_strategy(target, want))),
            Box::pin(self.run_strategy("semantic", self.semantic_strategy(target, want))),
            Box::pin(self.run_strategy("category", self.category_strategy(target, want))),
            Box::pin(self.run_strategy("temporal", self.temporal_strategy(target, want))),
        ];
        let settled: Vec<StrategyResult> = join_all(futures)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        if settled.is_empty() {
            return Err(NewscoreError::Internal(
                "Every similarity strategy failed".to_string(),
            ));
        }

        let fused = fuse(&settled);

        // Accumulate in a scratch sorted set and read back the ranked page;
        // the set is scratch space, so it gets a short TTL in case the
        // delete below never runs.
        let store = self.gateway.store();
        let temp_key = keys::temp_similarity(&target.id, Utc::now().timestamp_millis());
        for (id, score) in &fused {
            store.zadd(&temp_key, *score, id).await?;
        }
        store.expire(&temp_key, Duration::from_secs(60)).await?;
        let ranked = store.zrange(&temp_key, 0, want as i64 - 1, true).await?;
        let _ = store.del(&[temp_key]).await;

        let score_of: std::collections::HashMap<&str, f64> =
            fused.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let mut results = Vec::with_capacity(ranked.len());
        for id in &ranked {
            if id == &target.id {
                continue;
            }
            if let Some(article) = self.gateway.get_article(id).await? {
                let score = score_of.get(id.as_str()).copied().unwrap_or(0.0);
                results.push(ScoredArticle {
                    article,
                    score,
                    method: RetrievalMethod::Combined,
                    similarity: None,
                    matched_preference: None,
                    preference_order: None,
                });
            }
        }
        Ok(results)
    }

    async fn text_strategy(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<StrategyResult, NewscoreError> {
        let terms: Vec<String> = extract_ngrams(target).into_iter().take(12).collect();
        if terms.is_empty() {
            return Ok(StrategyResult {
                weight: TEXT_WEIGHT,
                scores: Vec::new(),
            });
        }
        let query = QueryNode::Text {
            fields: vec![
                TextField::Title,
                TextField::Description,
                TextField::Content,
                TextField::Summary,
            ],
            terms,
        };
        self.search_scored(target, &query, want, TEXT_WEIGHT).await
    }

    async fn semantic_strategy(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<StrategyResult, NewscoreError> {
        let terms: Vec<String> = extract_semantic_terms(target).into_iter().take(12).collect();
        if terms.is_empty() {
            return Ok(StrategyResult {
                weight: SEMANTIC_WEIGHT,
                scores: Vec::new(),
            });
        }
        let query = QueryNode::Text {
            fields: vec![
                TextField::Title,
                TextField::Description,
                TextField::Content,
                TextField::Summary,
            ],
            terms,
        };
        self.search_scored(target, &query, want, SEMANTIC_WEIGHT)
            .await
    }

    /// Ordered text search scored by normalized rank.
    async fn search_scored(
        &self,
        target: &Article,
        query: &QueryNode,
        want: usize,
        weight: f64,
    ) -> Result<StrategyResult, NewscoreError> {
        let opts = SearchOptions {
            limit: want,
            ..SearchOptions::default()
        };
        let found = self.gateway.text_search(query, &opts).await?;
        let total = found.articles.len();
        let scores = found
            .articles
            .iter()
            .enumerate()
            .filter(|(_, a)| a.id != target.id)
            .map(|(i, a)| (a.id.clone(), rank_score(i, total)))
            .collect();
        Ok(StrategyResult { weight, scores })
    }

    async fn category_strategy(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<StrategyResult, NewscoreError> {
        let mut tags = Vec::new();
        if let Some(sentiment) = target.sentiment {
            tags.push(QueryNode::Tag {
                field: TagField::Sentiment,
                value: sentiment.as_str().to_string(),
            });
        }
        if !target.source.name.is_empty() {
            tags.push(QueryNode::Tag {
                field: TagField::SourceName,
                value: target.source.name.clone(),
            });
        }
        if tags.is_empty() {
            return Ok(StrategyResult {
                weight: CATEGORY_WEIGHT,
                scores: Vec::new(),
            });
        }
        let opts = SearchOptions {
            limit: want,
            ..SearchOptions::default()
        };
        let found = self
            .gateway
            .text_search(&QueryNode::Or(tags), &opts)
            .await?;
        let scores = found
            .articles
            .iter()
            .filter(|a| a.id != target.id)
            .map(|a| (a.id.clone(), category_score(target, a)))
            .collect();
        Ok(StrategyResult {
            weight: CATEGORY_WEIGHT,
            scores,
        })
    }

    async fn temporal_strategy(
        &self,
        target: &Article,
        want: usize,
    ) -> Result<StrategyResult, NewscoreError> {
        let window = chrono::Duration::days(TEMPORAL_WINDOW_DAYS);
        let query = QueryNode::PublishedBetween {
            after: Some(target.published_at - window),
            before: Some(target.published_at + window),
        };
        let opts = SearchOptions {
            limit: want,
            ..SearchOptions::default()
        };
        let found = self.gateway.text_search(&query, &opts).await?;
        let scores = found
            .articles
            .iter()
            .filter(|a| a.id != target.id)
            .map(|a| {
                (
                    a.id.clone(),
                    temporal_score(target.published_at, a.published_at),
                )
            })
            .collect();
        Ok(StrategyResult {
            weight: TEMPORAL_WEIGHT,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::embedding::local::HashingEmbeddingProvider;
    use crate::embedding::EmbeddingError;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    const DIM: usize = 64;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Generation("offline".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    async fn seed_engine(embedder: Arc<dyn EmbeddingProvider>) -> (SimilarityEngine, Vec<String>) {
        let store: Arc<dyn crate::store::DataStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(IndexGateway::new(Arc::clone(&store), DIM));
        let cache = Arc::new(CacheLayer::new(Arc::clone(&store), CacheConfig::default()));
        let hasher = HashingEmbeddingProvider::new(DIM);

        let base = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let mut ids = Vec::new();
        for (i, (title, kw)) in [
            ("AI chips power new datacenter", vec!["ai", "chip"]),
            ("Chipmaker expands AI chip output", vec!["ai", "chip"]),
            ("Gardening tips for winter", vec!["garden"]),
        ]
        .into_iter()
        .enumerate()
        {
            let mut a = Article::new(title, base + chrono::Duration::days(i as i64));
            a.keywords = kw.into_iter().map(String::from).collect();
            a.summary = title.to_string();
            a.vector = Some(hasher.embed(&a.search_text()).await.unwrap());
            gateway.put_article(&a).await.unwrap();
            ids.push(a.id.clone());
        }

        let engine = SimilarityEngine::new(gateway, cache, embedder, Default::default());
        (engine, ids)
    }

    #[tokio::test]
    async fn test_vector_path_excludes_self_and_thresholds() {
        let (engine, ids) = seed_engine(Arc::new(HashingEmbeddingProvider::new(DIM))).await;
        let response = engine
            .similar(&ids[0], 5, 0, &SimilarOptions::default())
            .await
            .unwrap();
        assert!(!response.cached);
        assert_eq!(response.method, RetrievalMethod::Vector);
        assert!(response.articles.iter().all(|a| a.article.id != ids[0]));
        assert!(response
            .articles
            .iter()
            .all(|a| a.similarity.unwrap_or(0.0) >= 0.5));
        // The sibling chip article matches, the gardening one does not
        assert!(response.articles.iter().any(|a| a.article.id == ids[1]));
        assert!(response.articles.iter().all(|a| a.article.id != ids[2]));
    }

    #[tokio::test]
    async fn test_second_call_is_cached_with_same_order() {
        let (engine, ids) = seed_engine(Arc::new(HashingEmbeddingProvider::new(DIM))).await;
        let first = engine
            .similar(&ids[0], 3, 0, &SimilarOptions::default())
            .await
            .unwrap();
        let second = engine
            .similar(&ids[0], 3, 0, &SimilarOptions::default())
            .await
            .unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert!(second.cache_age_secs.is_some());
        let order = |r: &SimilarResponse| {
            r.articles
                .iter()
                .map(|a| a.article.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
    }

    #[tokio::test]
    async fn test_force_refresh_recomputes() {
        let (engine, ids) = seed_engine(Arc::new(HashingEmbeddingProvider::new(DIM))).await;
        engine
            .similar(&ids[0], 3, 0, &SimilarOptions::default())
            .await
            .unwrap();
        let refreshed = engine
            .similar(&ids[0], 3, 0, &SimilarOptions { force_refresh: true })
            .await
            .unwrap();
        assert!(!refreshed.cached);
    }

    #[tokio::test]
    async fn test_embedding_failure_uses_fused_fallback() {
        let (engine, ids) = seed_engine(Arc::new(FailingEmbedder)).await;
        let response = engine
            .similar(&ids[0], 5, 0, &SimilarOptions::default())
            .await
            .unwrap();
        assert_eq!(response.method, RetrievalMethod::Combined);
        assert!(!response.cached);
        assert!(response.articles.iter().all(|a| a.article.id != ids[0]));
        // Text overlap should surface the sibling chip article
        assert!(response.articles.iter().any(|a| a.article.id == ids[1]));
    }

    #[tokio::test]
    async fn test_missing_target_returns_empty() {
        let (engine, _) = seed_engine(Arc::new(HashingEmbeddingProvider::new(DIM))).await;
        let response = engine
            .similar("does-not-exist", 5, 0, &SimilarOptions::default())
            .await
            .unwrap();
        assert!(response.articles.is_empty());
        assert_eq!(response.total, 0);
    }
}
