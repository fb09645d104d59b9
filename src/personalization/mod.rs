/// Personalized feed construction and filtered search
///
/// Feeds are assembled per user by running one thresholded vector query per
/// stored preference (earlier preferences weigh more), merging and
/// deduplicating, filtering out already-read articles, and topping up with
/// general newest articles. Cached feeds store the pre-filter ranked list
/// and are guarded by an md5 preference-version hash: updating preferences
/// cascade-invalidates every personalization cache for that user, so any
/// later read re-validates and recomputes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::cache::{keys, CacheLayer, Envelope};
use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::NewscoreError;
use crate::index::IndexGateway;
use crate::model::{
    normalize_preferences, RetrievalMethod, ScoredArticle, Sentiment, UserPreferences,
};
use crate::read_history::ReadHistory;
use crate::store::{cosine_similarity, QueryNode, SearchOptions};

/// Fraction of the page that may be read-filtered out of a cache hit
/// before the hit is abandoned and recomputed.
const STALE_HIT_RATIO: f64 = 0.3;

/// Extra results kept beyond the requested page before topping up.
const TOPUP_MARGIN: usize = 10;

/// Score assigned to general top-up articles.
const GENERAL_SCORE: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Skip the cache probe and recompute.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub articles: Vec<ScoredArticle>,
    pub total: u64,
    pub personalized_count: usize,
    pub cached: bool,
    pub filtered_read_count: usize,
    #[serde(default)]
    pub fallback: bool,
}

/// md5 over the JSON preference array — the cache guard value.
pub fn preference_version(preferences: &[String]) -> String {
    let json = serde_json::to_string(preferences).unwrap_or_default();
    hex::encode(Md5::digest(json.as_bytes()))
}

fn search_hash(query: &str, sentiment: Option<Sentiment>, source: Option<&str>) -> String {
    let raw = format!(
        "{}|{}|{}",
        query,
        sentiment.map(|s| s.as_str()).unwrap_or(""),
        source.unwrap_or("")
    );
    hex::encode(Md5::digest(raw.as_bytes()))
}

fn page(results: &[ScoredArticle], limit: usize, offset: usize) -> Vec<ScoredArticle> {
    results.iter().skip(offset).take(limit).cloned().collect()
}

fn personalized_count(slice: &[ScoredArticle]) -> usize {
    slice
        .iter()
        .filter(|a| a.matched_preference.as_deref() != Some("general"))
        .count()
}

pub struct PersonalizationEngine {
    gateway: Arc<IndexGateway>,
    cache: Arc<CacheLayer>,
    embedder: Arc<dyn EmbeddingProvider>,
    read_history: Arc<ReadHistory>,
    cfg: SearchConfig,
}

impl PersonalizationEngine {
    pub fn new(
        gateway: Arc<IndexGateway>,
        cache: Arc<CacheLayer>,
        embedder: Arc<dyn EmbeddingProvider>,
        read_history: Arc<ReadHistory>,
        cfg: SearchConfig,
    ) -> PersonalizationEngine {
        PersonalizationEngine {
            gateway,
            cache,
            embedder,
            read_history,
            cfg,
        }
    }

    fn feed_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.config().personalized_ttl_secs)
    }

    fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.config().personalized_search_ttl_secs)
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.op_timeout_secs)
    }

    // --- preferences ---

    pub async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPreferences>, NewscoreError> {
        let Some(doc) = self
            .cache
            .store()
            .get_json(&keys::preferences(user_id))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(doc)?))
    }

    /// Store (or replace) a user's preference list and cascade-invalidate
    /// every personalization cache for that user. After this returns, any
    /// later personalized read re-validates the version hash and
    /// recomputes on mismatch.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        topics: &[String],
    ) -> Result<UserPreferences, NewscoreError> {
        let normalized = normalize_preferences(topics)?;
        let existing = self.get_preferences(user_id).await?;
        let now = Utc::now();
        let prefs = UserPreferences {
            user_id: user_id.to_string(),
            preferences: normalized,
            created_at: existing.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        let doc = serde_json::to_value(&prefs)?;
        self.cache
            .store()
            .put_json(&keys::preferences(user_id), &doc)
            .await?;
        let invalidated = self.cache.invalidate_personalized(user_id).await?;
        tracing::info!(
            user_id,
            preferences = prefs.preferences.len(),
            invalidated,
            "Preferences updated"
        );
        Ok(prefs)
    }

    // --- feed ---

    pub async fn personalized_feed(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
        opts: &FeedOptions,
    ) -> Result<FeedResponse, NewscoreError> {
        let payload_key = keys::personalized(user_id, limit, offset);
        let version_key = keys::prefs_version(user_id);
        let stats_key = keys::personalized_stats(user_id);

        let preferences = self.get_preferences(user_id).await?;

        if !opts.force_refresh {
            if let Some(response) = self
                .probe_feed(&payload_key, &version_key, &preferences, user_id, limit, offset)
                .await
            {
                self.cache.record_hit(&stats_key).await;
                return Ok(response);
            }
        }
        self.cache.record_miss(&stats_key).await;

        let Some(preferences) = preferences else {
            return self.general_fallback(user_id, limit, offset).await;
        };

        let ranked = self.rank_by_preferences(&preferences.preferences, limit, offset).await;
        let (mut filtered, removed) = self.read_history.filter(user_id, ranked.clone()).await?;

        let want = limit + offset + TOPUP_MARGIN;
        let mut cached_list = ranked;
        if filtered.len() < want {
            let chosen: HashSet<String> =
                cached_list.iter().map(|a| a.article.id.clone()).collect();
            let topups = self.general_articles(want - filtered.len(), &chosen).await?;
            let (fresh_topups, _) = self.read_history.filter(user_id, topups.clone()).await?;
            cached_list.extend(topups);
            filtered.extend(fresh_topups);
        }

        // Write back the pre-filter list plus the version guard, same TTL.
        self.cache
            .put_value(
                &payload_key,
                &Envelope::new(cached_list, RetrievalMethod::Vector),
                self.feed_ttl(),
            )
            .await;
        self.cache
            .put_value(
                &version_key,
                &preference_version(&preferences.preferences),
                self.feed_ttl(),
            )
            .await;

        let slice = page(&filtered, limit, offset);
        Ok(FeedResponse {
            personalized_count: personalized_count(&slice),
            total: filtered.len() as u64,
            articles: slice,
            cached: false,
            filtered_read_count: removed,
            fallback: false,
        })
    }

    /// Cache probe: trust a hit only when the stored preference-version
    /// hash matches the current preferences and the read filter removes no
    /// more than STALE_HIT_RATIO of a page.
    async fn probe_feed(
        &self,
        payload_key: &str,
        version_key: &str,
        preferences: &Option<UserPreferences>,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Option<FeedResponse> {
        let (payload, stored_version) = self
            .cache
            .store()
            .get_pair(payload_key, version_key)
            .await
            .ok()?;
        let envelope: Envelope = serde_json::from_str(&payload?).ok()?;

        let current = preference_version(&preferences.as_ref()?.preferences);
        let stored: String = stored_version
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        if stored != current {
            return None;
        }

        let (filtered, removed) = self
            .read_history
            .filter(user_id, envelope.results.clone())
            .await
            .ok()?;
        if removed as f64 > STALE_HIT_RATIO * limit as f64 {
            // Too much of the cached page is already read; recompute.
            return None;
        }
        let slice = page(&filtered, limit, offset);
        Some(FeedResponse {
            personalized_count: personalized_count(&slice),
            total: filtered.len() as u64,
            articles: slice,
            cached: true,
            filtered_read_count: removed,
            fallback: false,
        })
    }

    /// One thresholded vector query per preference; earlier preferences
    /// weigh more. Individual embedding failures skip that preference.
    async fn rank_by_preferences(
        &self,
        preferences: &[String],
        limit: usize,
        offset: usize,
    ) -> Vec<ScoredArticle> {
        let want = limit + offset + self.cfg.knn_overshoot;
        let threshold = self.cfg.personalization_threshold;
        let mut seen: HashSet<String> = HashSet::new();
        let mut ranked: Vec<ScoredArticle> = Vec::new();

        for (order, preference) in preferences.iter().enumerate() {
            let weight = (1.0 - 0.1 * order as f64).max(0.0);
            if weight == 0.0 {
                break;
            }
            let vector = match tokio::time::timeout(
                self.op_timeout(),
                self.embedder.embed(preference),
            )
            .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    tracing::warn!(preference = %preference, error = %e, "Preference embedding failed, skipping");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(preference = %preference, "Preference embedding timed out, skipping");
                    continue;
                }
            };
            let hits = match self.gateway.vector_knn(&vector, want, None, None).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(preference = %preference, error = %e, "Preference vector search failed, skipping");
                    continue;
                }
            };
            for hit in hits {
                if hit.similarity < threshold || !seen.insert(hit.article.id.clone()) {
                    continue;
                }
                ranked.push(ScoredArticle {
                    score: hit.similarity * weight,
                    similarity: Some(hit.similarity),
                    method: RetrievalMethod::Vector,
                    matched_preference: Some(preference.clone()),
                    preference_order: Some(order),
                    article: hit.article,
                });
            }
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Most-recent general articles, excluding already-chosen ids.
    async fn general_articles(
        &self,
        count: usize,
        exclude: &HashSet<String>,
    ) -> Result<Vec<ScoredArticle>, NewscoreError> {
        let opts = SearchOptions {
            limit: count + exclude.len(),
            ..SearchOptions::default()
        };
        let found = self.gateway.text_search(&QueryNode::All, &opts).await?;
        Ok(found
            .articles
            .into_iter()
            .filter(|a| !exclude.contains(&a.id))
            .take(count)
            .map(|article| ScoredArticle {
                article,
                score: GENERAL_SCORE,
                method: RetrievalMethod::General,
                similarity: None,
                matched_preference: Some("general".to_string()),
                preference_order: None,
            })
            .collect())
    }

    /// No stored preferences: serve the most-recent feed, read-filtered,
    /// marked as a fallback.
    async fn general_fallback(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<FeedResponse, NewscoreError> {
        let general = self
            .general_articles(limit + offset + TOPUP_MARGIN, &HashSet::new())
            .await?;
        let (filtered, removed) = self.read_history.filter(user_id, general).await?;
        let slice = page(&filtered, limit, offset);
        Ok(FeedResponse {
            personalized_count: 0,
            total: filtered.len() as u64,
            articles: slice,
            cached: false,
            filtered_read_count: removed,
            fallback: true,
        })
    }

    // --- search ---

    /// Personalized search: re-rank a wide feed buffer against the query
    /// vector (word overlap for vectorless candidates), then apply
    /// sentiment/source filters.
    #[allow(clippy::too_many_arguments)]
    pub async fn personalized_search(
        &self,
        user_id: &str,
        query: &str,
        sentiment: Option<Sentiment>,
        source: Option<&str>,
        limit: usize,
        offset: usize,
        opts: &FeedOptions,
    ) -> Result<FeedResponse, NewscoreError> {
        let hash = search_hash(query, sentiment, source);
        let payload_key = keys::personalized_search(user_id, &hash, limit, offset);

        if !opts.force_refresh {
            if let Some(envelope) = self.cache.get_value::<Envelope>(&payload_key).await {
                let (filtered, removed) = self
                    .read_history
                    .filter(user_id, envelope.results)
                    .await?;
                let slice = page(&filtered, limit, offset);
                return Ok(FeedResponse {
                    personalized_count: personalized_count(&slice),
                    total: filtered.len() as u64,
                    articles: slice,
                    cached: true,
                    filtered_read_count: removed,
                    fallback: false,
                });
            }
        }

        let buffer = (8 * limit).max(100);
        let feed = self
            .personalized_feed(user_id, buffer, 0, opts)
            .await?;
        let mut candidates = feed.articles;

        if !query.trim().is_empty() {
            candidates = self.rank_against_query(query, candidates).await;
        }
        if let Some(s) = sentiment {
            candidates.retain(|c| c.article.sentiment == Some(s));
        }
        if let Some(src) = source {
            candidates.retain(|c| c.article.source.name.eq_ignore_ascii_case(src));
        }

        self.cache
            .put_value(
                &payload_key,
                &Envelope::new(candidates.clone(), RetrievalMethod::Vector),
                self.search_ttl(),
            )
            .await;

        let slice = page(&candidates, limit, offset);
        Ok(FeedResponse {
            personalized_count: personalized_count(&slice),
            total: candidates.len() as u64,
            articles: slice,
            cached: false,
            filtered_read_count: feed.filtered_read_count,
            fallback: feed.fallback,
        })
    }

    /// Keep candidates whose similarity to the query clears the search
    /// threshold. Candidates with stored vectors use cosine similarity to
    /// the query embedding; the rest fall back to word overlap. Ties on
    /// the feed score.
    async fn rank_against_query(
        &self,
        query: &str,
        candidates: Vec<ScoredArticle>,
    ) -> Vec<ScoredArticle> {
        let threshold = self.cfg.search_threshold;
        let query_vector = match tokio::time::timeout(
            self.op_timeout(),
            self.embedder.embed(query),
        )
        .await
        {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Query embedding failed, using word overlap only");
                None
            }
            Err(_) => {
                tracing::warn!("Query embedding timed out, using word overlap only");
                None
            }
        };

        let mut scored: Vec<(f64, ScoredArticle)> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let similarity = match (&query_vector, &candidate.article.vector) {
                    (Some(qv), Some(av)) => cosine_similarity(qv, av),
                    _ => word_overlap(query, &candidate.article),
                };
                (similarity >= threshold).then_some((similarity, candidate))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.1.score
                        .partial_cmp(&a.1.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        scored.into_iter().map(|(_, c)| c).collect()
    }
}

/// Fraction of query words appearing in the candidate's text fields.
fn word_overlap(query: &str, article: &crate::model::Article) -> f64 {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text = format!(
        "{} {} {} {}",
        article.title, article.description, article.summary, article.content
    )
    .to_lowercase();
    let matched = query_words.iter().filter(|w| text.contains(*w)).count();
    matched as f64 / query_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::embedding::local::HashingEmbeddingProvider;
    use crate::model::Article;
    use crate::store::memory::MemoryStore;
    use crate::store::DataStore;
    use chrono::TimeZone;

    const DIM: usize = 64;

    struct Harness {
        engine: PersonalizationEngine,
        read_history: Arc<ReadHistory>,
        ids: Vec<String>,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(IndexGateway::new(Arc::clone(&store), DIM));
        let cache = Arc::new(CacheLayer::new(Arc::clone(&store), CacheConfig::default()));
        let read_history = Arc::new(ReadHistory::new(Arc::clone(&store), 7200));
        let embedder = Arc::new(HashingEmbeddingProvider::new(DIM));

        let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut ids = Vec::new();
        for (i, (title, kw)) in [
            ("Technology stocks rally on chip news", vec!["technology", "chip"]),
            ("New technology platform launches", vec!["technology"]),
            ("Football season opens with upsets", vec!["sports", "football"]),
            ("Local elections draw record turnout", vec!["politics"]),
        ]
        .into_iter()
        .enumerate()
        {
            let mut a = Article::new(title, base + chrono::Duration::days(i as i64));
            a.keywords = kw.into_iter().map(String::from).collect();
            a.summary = title.to_string();
            a.vector = Some(embedder.embed(&a.search_text()).await.unwrap());
            gateway.put_article(&a).await.unwrap();
            ids.push(a.id.clone());
        }

        let engine = PersonalizationEngine::new(
            gateway,
            cache,
            embedder,
            Arc::clone(&read_history),
            SearchConfig::default(),
        );
        Harness {
            engine,
            read_history,
            ids,
        }
    }

    #[tokio::test]
    async fn test_preference_version_is_stable() {
        let prefs = vec!["technology".to_string(), "sports".to_string()];
        assert_eq!(preference_version(&prefs), preference_version(&prefs));
        assert_ne!(
            preference_version(&prefs),
            preference_version(&["sports".to_string()])
        );
    }

    #[tokio::test]
    async fn test_feed_without_preferences_falls_back_to_general() {
        let h = harness().await;
        let feed = h
            .engine
            .personalized_feed("u1", 3, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(feed.fallback);
        assert_eq!(feed.personalized_count, 0);
        assert!(!feed.articles.is_empty());
    }

    #[tokio::test]
    async fn test_feed_ranks_preferred_topics_first() {
        let h = harness().await;
        h.engine
            .update_preferences("u1", &["technology".to_string()])
            .await
            .unwrap();
        let feed = h
            .engine
            .personalized_feed("u1", 4, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(!feed.fallback);
        assert!(feed.personalized_count >= 1);
        let top = &feed.articles[0];
        assert_eq!(top.matched_preference.as_deref(), Some("technology"));
        assert!(top.similarity.unwrap() >= 0.4);
    }

    #[tokio::test]
    async fn test_feed_caches_and_invalidation_forces_recompute() {
        let h = harness().await;
        h.engine
            .update_preferences("u1", &["technology".to_string()])
            .await
            .unwrap();
        let first = h
            .engine
            .personalized_feed("u1", 3, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(!first.cached);
        let second = h
            .engine
            .personalized_feed("u1", 3, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(second.cached);

        // Preference update must invalidate; the next read recomputes
        h.engine
            .update_preferences("u1", &["sports".to_string()])
            .await
            .unwrap();
        let third = h
            .engine
            .personalized_feed("u1", 3, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(!third.cached);
    }

    #[tokio::test]
    async fn test_feed_filters_read_articles() {
        let h = harness().await;
        h.engine
            .update_preferences("u1", &["technology".to_string()])
            .await
            .unwrap();
        let feed = h
            .engine
            .personalized_feed("u1", 4, 0, &FeedOptions::default())
            .await
            .unwrap();
        let first_id = feed.articles[0].article.id.clone();
        h.read_history.mark_read("u1", &first_id).await.unwrap();

        let feed = h
            .engine
            .personalized_feed("u1", 4, 0, &FeedOptions::default())
            .await
            .unwrap();
        assert!(feed.articles.iter().all(|a| a.article.id != first_id));
    }

    #[tokio::test]
    async fn test_search_applies_query_and_filters() {
        let h = harness().await;
        h.engine
            .update_preferences("u1", &["technology".to_string()])
            .await
            .unwrap();
        let result = h
            .engine
            .personalized_search(
                "u1",
                "football season",
                None,
                None,
                5,
                0,
                &FeedOptions::default(),
            )
            .await
            .unwrap();
        // The football article survives the query threshold, tech ones do not
        assert!(result
            .articles
            .iter()
            .any(|a| a.article.id == h.ids[2]));
        assert!(result.articles.iter().all(|a| a.article.id != h.ids[3]));
    }

    #[tokio::test]
    async fn test_normalization_rejects_empty_topics() {
        let h = harness().await;
        let err = h
            .engine
            .update_preferences("u1", &["  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, NewscoreError::Validation { .. }));
    }
}
