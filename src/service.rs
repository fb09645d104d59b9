/// NewsService — the library facade the external HTTP layer mounts on.
///
/// Owns the component graph (gateway, cache, engines, metrics, read
/// history) and implements the request-level semantics that are not HTTP:
/// article-view side effects, composite search dispatch, preference CRUD
/// validation, metadata lists, and admin pass-throughs. Pagination is
/// validated and computed here so every list operation shares one
/// envelope.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cache::admin::{CacheStatistics, CacheType, ClearReport, NuclearReport};
use crate::cache::{keys, CacheLayer, CacheStats};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::errors::NewscoreError;
use crate::index::IndexGateway;
use crate::metrics::{ArticleMetrics, HistoryEntry, MetricsReport, MetricsTracker, TrendingArticle, ViewMeta};
use crate::model::{
    self, validate_paging, Article, Page, Pagination, Sentiment, UserPreferences,
};
use crate::personalization::{FeedOptions, FeedResponse, PersonalizationEngine};
use crate::read_history::ReadHistory;
use crate::similarity::{SimilarOptions, SimilarResponse, SimilarityEngine};
use crate::store::{DataStore, QueryNode, SearchOptions, TagField};

/// The fixed topic list served as metadata to clients. Topics are free
/// text at search time; this list is presentation only.
pub const TOPICS: [&str; 9] = [
    "India",
    "Technology",
    "Politics",
    "World",
    "Sports",
    "Business",
    "Entertainment",
    "Science",
    "Health",
];

/// Cap on each side of a combined search+topic intersection.
const INTERSECT_CAP: usize = 1000;

/// Who is viewing, for the article side effects.
#[derive(Debug, Clone, Default)]
pub struct ViewerContext {
    pub user_id: Option<String>,
    pub meta: ViewMeta,
}

/// Article payload with its metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub metrics: ArticleMetrics,
}

/// Composite search inputs; see dispatch() for the routing rules.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub q: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub source: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub store: &'static str,
}

/// Cached shape for the all-articles list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedList {
    articles: Vec<Article>,
    total: u64,
}

pub struct NewsService {
    gateway: Arc<IndexGateway>,
    cache: Arc<CacheLayer>,
    similarity: SimilarityEngine,
    personalization: PersonalizationEngine,
    metrics: MetricsTracker,
    read_history: Arc<ReadHistory>,
    start_time: Instant,
}

impl NewsService {
    pub fn new(
        store: Arc<dyn DataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> NewsService {
        let gateway = Arc::new(IndexGateway::new(
            Arc::clone(&store),
            config.embedding.dimension,
        ));
        let cache = Arc::new(CacheLayer::new(Arc::clone(&store), config.cache.clone()));
        let read_history = Arc::new(ReadHistory::new(
            Arc::clone(&store),
            config.cache.read_ttl_secs,
        ));
        let similarity = SimilarityEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            Arc::clone(&embedder),
            config.search.clone(),
        );
        let personalization = PersonalizationEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&cache),
            Arc::clone(&embedder),
            Arc::clone(&read_history),
            config.search.clone(),
        );
        let metrics = MetricsTracker::new(Arc::clone(&store), Arc::clone(&gateway));
        NewsService {
            gateway,
            cache,
            similarity,
            personalization,
            metrics,
            read_history,
            start_time: Instant::now(),
        }
    }

    /// Drop-then-create the composite article index. Run once at startup.
    pub async fn ensure_index(&self) -> Result<(), NewscoreError> {
        self.gateway.recreate_index().await
    }

    pub fn gateway(&self) -> &Arc<IndexGateway> {
        &self.gateway
    }

    pub fn read_history(&self) -> &Arc<ReadHistory> {
        &self.read_history
    }

    // --- articles ---

    /// Fetch an article by id with view side effects: metrics are
    /// recorded, and a known viewer gets the article marked read plus
    /// their personalization caches invalidated.
    pub async fn article(
        &self,
        id: &str,
        viewer: &ViewerContext,
    ) -> Result<ArticleView, NewscoreError> {
        let Some(article) = self.gateway.get_article(id).await? else {
            return Err(NewscoreError::article_not_found(id));
        };

        let metrics = self
            .metrics
            .record_view(id, viewer.user_id.as_deref(), &viewer.meta)
            .await?;

        if let Some(user_id) = &viewer.user_id {
            if let Err(e) = self.read_history.mark_read(user_id, id).await {
                tracing::warn!(user_id = %user_id, article_id = id, error = %e, "Failed to mark read");
            }
            if let Err(e) = self.cache.invalidate_personalized(user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to invalidate personalized cache");
            }
        }

        Ok(ArticleView { article, metrics })
    }

    /// All articles, newest first, through the short-TTL list cache.
    pub async fn list_articles(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<Page<Article>, NewscoreError> {
        validate_paging(page, limit)?;
        let offset = (page - 1) * limit;
        let cache_key = keys::all_articles(limit, offset);

        if let Some(cached) = self.cache.get_value::<CachedList>(&cache_key).await {
            return Ok(Page {
                pagination: Pagination::new(page, limit, cached.total),
                data: cached.articles,
            });
        }

        let found = self
            .gateway
            .text_search(
                &QueryNode::All,
                &SearchOptions {
                    limit,
                    offset,
                    ..SearchOptions::default()
                },
            )
            .await?;
        self.cache
            .put_value(
                &cache_key,
                &CachedList {
                    articles: found.articles.clone(),
                    total: found.total,
                },
                std::time::Duration::from_secs(self.cache.config().all_articles_ttl_secs),
            )
            .await;

        Ok(Page {
            pagination: Pagination::new(page, limit, found.total),
            data: found.articles,
        })
    }

    // --- composite search ---

    /// Composite search dispatch:
    /// - topic only: topic terms ORed across every text field
    /// - search fields only: q expansion ANDed with sentiment/source tags
    /// - both: intersect the two result sets (each capped, newest first) by id
    /// - neither: all articles, newest first
    pub async fn search(
        &self,
        request: &SearchRequest,
        page: usize,
        limit: usize,
    ) -> Result<Page<Article>, NewscoreError> {
        validate_paging(page, limit)?;
        let offset = (page - 1) * limit;

        let search_query = self.build_search_query(request);
        let topic_query = request
            .topic
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| QueryNode::text_all_fields(vec![t.trim().to_string()]));

        match (search_query, topic_query) {
            (None, None) => self.list_articles(page, limit).await,
            (Some(query), None) | (None, Some(query)) => {
                let found = self
                    .gateway
                    .text_search(
                        &query,
                        &SearchOptions {
                            limit,
                            offset,
                            ..SearchOptions::default()
                        },
                    )
                    .await?;
                Ok(Page {
                    pagination: Pagination::new(page, limit, found.total),
                    data: found.articles,
                })
            }
            (Some(search), Some(topic)) => {
                let cap_opts = SearchOptions {
                    limit: INTERSECT_CAP,
                    ..SearchOptions::default()
                };
                let by_search = self.gateway.text_search(&search, &cap_opts).await?;
                let by_topic = self.gateway.text_search(&topic, &cap_opts).await?;
                let topic_ids: std::collections::HashSet<String> =
                    by_topic.articles.into_iter().map(|a| a.id).collect();
                let intersection: Vec<Article> = by_search
                    .articles
                    .into_iter()
                    .filter(|a| topic_ids.contains(&a.id))
                    .collect();
                let total = intersection.len() as u64;
                let data = intersection
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .collect();
                Ok(Page {
                    pagination: Pagination::new(page, limit, total),
                    data,
                })
            }
        }
    }

    fn build_search_query(&self, request: &SearchRequest) -> Option<QueryNode> {
        let mut clauses = Vec::new();
        if let Some(q) = request.q.as_deref().filter(|q| !q.trim().is_empty()) {
            let terms: Vec<String> = q.split_whitespace().map(String::from).collect();
            clauses.push(QueryNode::text_all_fields(terms));
        }
        if let Some(sentiment) = request.sentiment {
            clauses.push(QueryNode::Tag {
                field: TagField::Sentiment,
                value: sentiment.as_str().to_string(),
            });
        }
        if let Some(source) = request.source.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push(QueryNode::Tag {
                field: TagField::SourceName,
                value: source.trim().to_string(),
            });
        }
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(QueryNode::And(clauses)),
        }
    }

    /// Topic feed (`/news/topic/:topic`).
    pub async fn topic_feed(
        &self,
        topic: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Article>, NewscoreError> {
        self.search(
            &SearchRequest {
                topic: Some(topic.to_string()),
                ..SearchRequest::default()
            },
            page,
            limit,
        )
        .await
    }

    /// Sentiment feed (`/news/sentiment/:sentiment`).
    pub async fn sentiment_feed(
        &self,
        sentiment: &str,
        page: usize,
        limit: usize,
    ) -> Result<Page<Article>, NewscoreError> {
        let sentiment = Sentiment::parse(sentiment).ok_or_else(|| {
            NewscoreError::validation("sentiment", "must be positive, negative, or neutral")
        })?;
        self.search(
            &SearchRequest {
                sentiment: Some(sentiment),
                ..SearchRequest::default()
            },
            page,
            limit,
        )
        .await
    }

    // --- retrieval engines ---

    pub async fn similar(
        &self,
        article_id: &str,
        page: usize,
        limit: usize,
        opts: &SimilarOptions,
    ) -> Result<SimilarResponse, NewscoreError> {
        validate_paging(page, limit)?;
        self.similarity
            .similar(article_id, limit, (page - 1) * limit, opts)
            .await
    }

    pub async fn personalized_feed(
        &self,
        user_id: &str,
        page: usize,
        limit: usize,
        opts: &FeedOptions,
    ) -> Result<FeedResponse, NewscoreError> {
        validate_paging(page, limit)?;
        self.personalization
            .personalized_feed(user_id, limit, (page - 1) * limit, opts)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn personalized_search(
        &self,
        user_id: &str,
        query: &str,
        sentiment: Option<Sentiment>,
        source: Option<&str>,
        page: usize,
        limit: usize,
        opts: &FeedOptions,
    ) -> Result<FeedResponse, NewscoreError> {
        validate_paging(page, limit)?;
        self.personalization
            .personalized_search(
                user_id,
                query,
                sentiment,
                source,
                limit,
                (page - 1) * limit,
                opts,
            )
            .await
    }

    // --- metrics ---

    pub async fn article_metrics(&self, article_id: &str) -> Result<MetricsReport, NewscoreError> {
        if !self.gateway.exists(article_id).await? {
            return Err(NewscoreError::article_not_found(article_id));
        }
        self.metrics.metrics(article_id).await
    }

    pub async fn trending(
        &self,
        limit: usize,
        period_days: u32,
    ) -> Result<Vec<TrendingArticle>, NewscoreError> {
        self.metrics.trending(limit, period_days).await
    }

    pub async fn user_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, NewscoreError> {
        self.metrics.user_history(user_id).await
    }

    // --- users and preferences ---

    pub fn generate_user_id(&self) -> String {
        model::generate_user_id()
    }

    pub async fn preferences(&self, user_id: &str) -> Result<UserPreferences, NewscoreError> {
        self.personalization
            .get_preferences(user_id)
            .await?
            .ok_or_else(|| NewscoreError::preferences_not_found(user_id))
    }

    /// Store or replace preferences (POST and PUT share the validation).
    pub async fn set_preferences(
        &self,
        user_id: &str,
        topics: &[String],
    ) -> Result<UserPreferences, NewscoreError> {
        self.personalization.update_preferences(user_id, topics).await
    }

    // --- metadata ---

    pub fn topics(&self) -> Vec<&'static str> {
        TOPICS.to_vec()
    }

    pub fn sentiments(&self) -> Vec<&'static str> {
        vec!["positive", "negative", "neutral"]
    }

    pub async fn sources(&self) -> Result<Vec<String>, NewscoreError> {
        self.gateway.list_sources().await
    }

    // --- admin ---

    pub async fn similar_stats(&self, article_id: &str) -> Result<CacheStats, NewscoreError> {
        self.cache.stats(&keys::similar_stats(article_id)).await
    }

    pub async fn clear_similar_cache(&self, article_id: &str) -> Result<u64, NewscoreError> {
        self.cache.invalidate_similar(article_id).await
    }

    pub async fn clear_all_cache_except_user(&self) -> Result<ClearReport, NewscoreError> {
        self.cache.clear_all_except_user().await
    }

    pub async fn clear_specific_cache_types(
        &self,
        types: &[CacheType],
    ) -> Result<ClearReport, NewscoreError> {
        self.cache.clear_specific_types(types).await
    }

    pub async fn nuclear_clear(&self, confirmation: &str) -> Result<NuclearReport, NewscoreError> {
        self.cache.nuclear_clear(confirmation).await
    }

    pub async fn cache_statistics(&self) -> Result<CacheStatistics, NewscoreError> {
        self.cache.statistics().await
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.cache.store().ping().await {
            Ok(()) => "ok",
            Err(_) => "unreachable",
        };
        HealthReport {
            status: if store == "ok" { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            store,
        }
    }
}
