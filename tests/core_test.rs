//! End-to-end scenarios driven through the NewsService facade against the
//! in-process store backend.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use newscore::cache::keys;
use newscore::config::Config;
use newscore::embedding::local::HashingEmbeddingProvider;
use newscore::embedding::EmbeddingProvider;
use newscore::errors::NewscoreError;
use newscore::metrics::ViewMeta;
use newscore::model::Article;
use newscore::personalization::FeedOptions;
use newscore::service::{NewsService, SearchRequest, ViewerContext};
use newscore::similarity::SimilarOptions;
use newscore::store::memory::MemoryStore;
use newscore::store::DataStore;

const DIM: usize = 64;

struct Harness {
    service: NewsService,
    store: Arc<dyn DataStore>,
    embedder: Arc<HashingEmbeddingProvider>,
}

async fn harness() -> Harness {
    let mut config = Config::default();
    config.embedding.dimension = DIM;
    let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashingEmbeddingProvider::new(DIM));
    let service = NewsService::new(
        Arc::clone(&store),
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        &config,
    );
    service.ensure_index().await.unwrap();
    Harness {
        service,
        store,
        embedder,
    }
}

impl Harness {
    /// Seed an article the way the ingestion pipeline would: summary,
    /// keywords, sentiment, and a stored embedding over the search text.
    async fn seed(
        &self,
        title: &str,
        day: u32,
        keywords: &[&str],
        sentiment: &str,
        topic_text: &str,
    ) -> Article {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        let mut article = Article::new(title, ts);
        article.keywords = keywords.iter().map(|k| k.to_string()).collect();
        article.summary = format!("{} {}", title, topic_text);
        article.sentiment = newscore::model::Sentiment::parse(sentiment);
        article.source.name = "testwire".to_string();
        article.vector = Some(self.embedder.embed(&article.search_text()).await.unwrap());
        self.service.gateway().put_article(&article).await.unwrap();
        article
    }

    fn viewer(user_id: &str) -> ViewerContext {
        ViewerContext {
            user_id: Some(user_id.to_string()),
            meta: ViewMeta {
                ip: Some("10.0.0.1".to_string()),
                user_agent: Some("test".to_string()),
                referrer: None,
                language: Some("en".to_string()),
            },
        }
    }
}

// Viewing an article records metrics and read history
#[tokio::test]
async fn test_article_view_records_metrics_and_read() {
    let h = harness().await;
    let a1 = h.seed("T", 1, &[], "neutral", "plain").await;

    let view = h
        .service
        .article(&a1.id, &Harness::viewer("user_1"))
        .await
        .unwrap();
    assert_eq!(view.article.title, "T");
    assert!(view.metrics.total_views >= 1);

    let read = h.service.read_history().list_read("user_1").await.unwrap();
    assert!(read.contains(&a1.id));
}

#[tokio::test]
async fn test_missing_article_is_not_found() {
    let h = harness().await;
    let err = h
        .service
        .article("missing", &ViewerContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NewscoreError::NotFound { .. }));
}

// Similar articles: first call misses, second hits with identical ordering
#[tokio::test]
async fn test_similar_first_miss_then_cached_same_order() {
    let h = harness().await;
    let a1 = h.seed("AI chips surge", 1, &["ai", "chip"], "positive", "silicon").await;
    h.seed("AI chip factories expand", 2, &["ai", "chip"], "positive", "silicon")
        .await;
    h.seed("Chip supply chains shift", 3, &["chip", "supply"], "neutral", "silicon")
        .await;
    h.seed("Winter garden checklist", 4, &["garden"], "neutral", "plants")
        .await;

    let first = h
        .service
        .similar(&a1.id, 1, 3, &SimilarOptions::default())
        .await
        .unwrap();
    assert!(!first.cached);

    let second = h
        .service
        .similar(&a1.id, 1, 3, &SimilarOptions::default())
        .await
        .unwrap();
    assert!(second.cached);

    let ids = |r: &newscore::similarity::SimilarResponse| {
        r.articles
            .iter()
            .map(|s| s.article.id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert!(ids(&first).iter().all(|id| id != &a1.id));
}

// Personalized feed caching and preference-update invalidation
#[tokio::test]
async fn test_personalized_invalidation_round_trip() {
    let h = harness().await;
    for i in 0..5 {
        h.seed(
            &format!("Technology update {}", i),
            1 + i,
            &["technology"],
            "neutral",
            "gadgets and software",
        )
        .await;
    }
    for i in 0..5 {
        h.seed(
            &format!("Sports recap {}", i),
            10 + i,
            &["sports"],
            "neutral",
            "matches and scores",
        )
        .await;
    }

    h.service
        .set_preferences("u1", &["technology".to_string()])
        .await
        .unwrap();

    let first = h
        .service
        .personalized_feed("u1", 1, 5, &FeedOptions::default())
        .await
        .unwrap();
    assert!(!first.cached);
    assert!(first.personalized_count >= 1);

    let second = h
        .service
        .personalized_feed("u1", 1, 5, &FeedOptions::default())
        .await
        .unwrap();
    assert!(second.cached);

    h.service
        .set_preferences("u1", &["sports".to_string()])
        .await
        .unwrap();
    let third = h
        .service
        .personalized_feed("u1", 1, 5, &FeedOptions::default())
        .await
        .unwrap();
    assert!(!third.cached);
}

// A served feed never contains an already-read article
#[tokio::test]
async fn test_feed_never_serves_read_articles() {
    let h = harness().await;
    for i in 0..6 {
        h.seed(
            &format!("Technology roundup {}", i),
            1 + i,
            &["technology"],
            "neutral",
            "gadgets",
        )
        .await;
    }
    h.service
        .set_preferences("u1", &["technology".to_string()])
        .await
        .unwrap();

    let feed = h
        .service
        .personalized_feed("u1", 1, 3, &FeedOptions::default())
        .await
        .unwrap();
    let read_id = feed.articles[0].article.id.clone();
    h.service
        .article(&read_id, &Harness::viewer("u1"))
        .await
        .unwrap();

    let feed = h
        .service
        .personalized_feed("u1", 1, 3, &FeedOptions::default())
        .await
        .unwrap();
    let read = h.service.read_history().list_read("u1").await.unwrap();
    for served in &feed.articles {
        assert!(!read.contains(&served.article.id));
    }
}

// Composite search intersects the free-text query with the topic
#[tokio::test]
async fn test_search_dispatch_intersects_query_and_topic() {
    let h = harness().await;
    h.seed("Rocket reaches orbit", 1, &["space"], "positive", "Technology launch")
        .await;
    h.seed("Rocket garden opens to visitors", 2, &["garden"], "neutral", "Travel feature")
        .await;
    h.seed("Technology fair draws crowds", 3, &["technology"], "neutral", "Technology expo")
        .await;

    let page = h
        .service
        .search(
            &SearchRequest {
                q: Some("rocket".to_string()),
                topic: Some("Technology".to_string()),
                ..SearchRequest::default()
            },
            1,
            10,
        )
        .await
        .unwrap();

    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].title, "Rocket reaches orbit");
}

#[tokio::test]
async fn test_search_pagination_envelope() {
    let h = harness().await;
    for i in 0..7 {
        h.seed(&format!("Story {}", i), 1 + i, &[], "neutral", "news").await;
    }
    let page = h.service.list_articles(2, 3).await.unwrap();
    assert!(page.data.len() <= 3);
    assert_eq!(page.pagination.total_count, 7);
    assert_eq!(page.pagination.total_pages, 3);
    assert!(page.pagination.current_page <= page.pagination.total_pages);
    assert!(page.pagination.has_next);
    assert!(page.pagination.has_prev);
}

#[tokio::test]
async fn test_paging_validation_rejects_bad_input() {
    let h = harness().await;
    assert!(h.service.list_articles(0, 10).await.is_err());
    assert!(h.service.list_articles(1, 0).await.is_err());
    assert!(h.service.list_articles(1, 101).await.is_err());
}

// Trending orders by today's views
#[tokio::test]
async fn test_trending_top_two() {
    let h = harness().await;
    let a1 = h.seed("Hot story", 1, &[], "neutral", "x").await;
    let a2 = h.seed("Warm story", 2, &[], "neutral", "x").await;
    let _a3 = h.seed("Cold story", 3, &[], "neutral", "x").await;

    for _ in 0..10 {
        h.service
            .article(&a1.id, &ViewerContext::default())
            .await
            .unwrap();
    }
    for _ in 0..5 {
        h.service
            .article(&a2.id, &ViewerContext::default())
            .await
            .unwrap();
    }

    let trending = h.service.trending(2, 1).await.unwrap();
    assert_eq!(trending.len(), 2);
    assert_eq!(trending[0].article_id, a1.id);
    assert_eq!(trending[1].article_id, a2.id);
}

// Nuclear clear refuses without the literal token
#[tokio::test]
async fn test_nuclear_requires_literal_token() {
    let h = harness().await;
    h.seed("Keep me", 1, &[], "neutral", "x").await;

    assert!(h.service.nuclear_clear("nuclear").await.is_err());
    assert!(h.service.nuclear_clear("").await.is_err());
    assert!(h.store.exists(&keys::article(
        &newscore::model::article_id("Keep me", &Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    )).await.unwrap());

    let report = h.service.nuclear_clear("NUCLEAR").await.unwrap();
    assert!(report.flushed);
}

// Admin clear preserves the user namespace
#[tokio::test]
async fn test_clear_all_except_user_preserves_user_keys() {
    let h = harness().await;
    let a1 = h.seed("Article", 1, &[], "neutral", "x").await;
    h.service
        .set_preferences("u1", &["technology".to_string()])
        .await
        .unwrap();
    h.service
        .article(&a1.id, &Harness::viewer("u1"))
        .await
        .unwrap();

    let report = h.service.clear_all_cache_except_user().await.unwrap();
    assert!(report.performance.total_keys_cleared > 0);

    for key in h.store.scan_match("user:*").await.unwrap() {
        assert!(h.store.exists(&key).await.unwrap(), "user key {} must survive", key);
    }
    assert!(h.store.exists(&keys::preferences("u1")).await.unwrap());
    assert!(!h.store.exists(&keys::article(&a1.id)).await.unwrap());
}

// Stored preferences are normalized
#[tokio::test]
async fn test_preferences_are_normalized_on_store() {
    let h = harness().await;
    let stored = h
        .service
        .set_preferences(
            "u1",
            &[
                " Technology ".to_string(),
                "SPORTS".to_string(),
                "technology".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(stored.preferences, vec!["technology", "sports"]);

    let fetched = h.service.preferences("u1").await.unwrap();
    assert_eq!(fetched.preferences, stored.preferences);
}

#[tokio::test]
async fn test_preferences_not_found_for_unknown_user() {
    let h = harness().await;
    let err = h.service.preferences("ghost").await.unwrap_err();
    assert!(matches!(err, NewscoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_metadata_endpoints() {
    let h = harness().await;
    h.seed("Sourced", 1, &[], "neutral", "x").await;

    assert_eq!(h.service.topics().len(), 9);
    assert_eq!(
        h.service.sentiments(),
        vec!["positive", "negative", "neutral"]
    );
    assert_eq!(h.service.sources().await.unwrap(), vec!["testwire"]);

    let id = h.service.generate_user_id();
    assert!(id.starts_with("user_"));
}

#[tokio::test]
async fn test_similar_stats_track_hits_and_misses() {
    let h = harness().await;
    let a1 = h.seed("Stats target", 1, &["ai"], "neutral", "x").await;
    h.seed("Stats neighbor", 2, &["ai"], "neutral", "x").await;

    h.service
        .similar(&a1.id, 1, 3, &SimilarOptions::default())
        .await
        .unwrap();
    h.service
        .similar(&a1.id, 1, 3, &SimilarOptions::default())
        .await
        .unwrap();

    let stats = h.service.similar_stats(&a1.id).await.unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);

    let cleared = h.service.clear_similar_cache(&a1.id).await.unwrap();
    assert!(cleared > 0);
    let after = h
        .service
        .similar(&a1.id, 1, 3, &SimilarOptions::default())
        .await
        .unwrap();
    assert!(!after.cached);
}

#[tokio::test]
async fn test_health_reports_ok() {
    let h = harness().await;
    let health = h.service.health().await;
    assert_eq!(health.status, "ok");
    assert_eq!(health.store, "ok");
}
