/// Admin cache-clearing operations
///
/// Pattern-driven clearing with per-pattern reports, a named-subset
/// variant, and the NUCLEAR-gated full flush. The one hard rule: the
/// `user:*` namespace (preferences, read history, stored user records) is
/// never touched by anything short of the nuclear path.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::NewscoreError;
use super::CacheLayer;

/// Literal confirmation token the nuclear clear requires.
pub const NUCLEAR_TOKEN: &str = "NUCLEAR";

/// The fixed pattern list clear_all_except_user iterates. Everything the
/// core persists outside `user:*` appears here; keys.rs is the source of
/// truth for the layouts.
const CLEAR_PATTERNS: &[(&str, &str)] = &[
    ("news:*", "article documents"),
    ("all_articles:*", "article list cache"),
    ("similar:*", "similar-article payloads and fallbacks"),
    ("similar_meta:*", "similar-article sidecars"),
    ("similar_stats:*", "similar-article hit/miss counters"),
    ("similar_lru", "similar-article LRU set"),
    ("similar_bloom:*", "similar-article membership hints"),
    ("similar_unique_articles:*", "similar-article daily uniques"),
    ("personalized_simple:*", "personalized feed payloads"),
    ("personalized_search_simple:*", "personalized search payloads"),
    ("personalized_stats_simple:*", "personalized hit/miss counters"),
    ("prefs_version_simple:*", "preference-version guards"),
    ("article_views:*", "total view counters"),
    ("article_unique_views:*", "unique viewer sets"),
    ("article_user_views:*", "viewer user sets"),
    ("article_daily_views:*", "daily view counters"),
    ("article_engagement:*", "engagement ring buffers"),
    ("article_last_viewed:*", "last-viewed timestamps"),
    ("user_article_views:*", "per-user view history maps"),
    ("temp:*", "temporary computation keys"),
];

/// Named cache-type subsets for clear_specific_types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Articles,
    ArticleMetrics,
    Search,
    SimilarArticles,
    Personalized,
    Versions,
    Fallbacks,
    Temp,
    Vectors,
    SearchIndex,
}

impl CacheType {
    pub fn parse(s: &str) -> Option<CacheType> {
        match s {
            "articles" => Some(CacheType::Articles),
            "article_metrics" => Some(CacheType::ArticleMetrics),
            "search" => Some(CacheType::Search),
            "similar_articles" => Some(CacheType::SimilarArticles),
            "personalized" => Some(CacheType::Personalized),
            "versions" => Some(CacheType::Versions),
            "fallbacks" => Some(CacheType::Fallbacks),
            "temp" => Some(CacheType::Temp),
            "vectors" => Some(CacheType::Vectors),
            "search_index" => Some(CacheType::SearchIndex),
            _ => None,
        }
    }

    /// Key patterns this type covers. SearchIndex is handled out of band
    /// (it drops indexes, not keys).
    fn patterns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CacheType::Articles => &[
                ("news:*", "article documents"),
                ("all_articles:*", "article list cache"),
            ],
            CacheType::ArticleMetrics => &[
                ("article_views:*", "total view counters"),
                ("article_unique_views:*", "unique viewer sets"),
                ("article_user_views:*", "viewer user sets"),
                ("article_daily_views:*", "daily view counters"),
                ("article_engagement:*", "engagement ring buffers"),
                ("article_last_viewed:*", "last-viewed timestamps"),
                ("user_article_views:*", "per-user view history maps"),
            ],
            CacheType::Search => &[
                ("search:*", "legacy search caches"),
                ("all_articles:*", "article list cache"),
            ],
            CacheType::SimilarArticles => &[
                ("similar:*", "similar-article payloads and fallbacks"),
                ("similar_meta:*", "similar-article sidecars"),
                ("similar_stats:*", "similar-article hit/miss counters"),
                ("similar_lru", "similar-article LRU set"),
                ("similar_bloom:*", "similar-article membership hints"),
                ("similar_unique_articles:*", "similar-article daily uniques"),
            ],
            CacheType::Personalized => &[
                ("personalized_simple:*", "personalized feed payloads"),
                ("personalized_search_simple:*", "personalized search payloads"),
                ("personalized_stats_simple:*", "personalized hit/miss counters"),
            ],
            CacheType::Versions => &[("prefs_version_simple:*", "preference-version guards")],
            CacheType::Fallbacks => &[("similar:*:fallback", "last-known-good tombstones")],
            CacheType::Temp => &[("temp:*", "temporary computation keys")],
            CacheType::Vectors => &[("vector:*", "detached vector caches (legacy layout)")],
            CacheType::SearchIndex => &[],
        }
    }
}

/// Result of clearing one pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReport {
    pub pattern: String,
    pub description: String,
    pub keys_cleared: u64,
    pub time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate performance block for a clearing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearPerformance {
    pub total_keys_cleared: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_freed: Option<u64>,
    pub elapsed_ms: u64,
    pub error_count: usize,
}

/// Full report of a clearing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearReport {
    pub patterns: Vec<PatternReport>,
    pub performance: ClearPerformance,
    pub errors: Vec<String>,
    /// Search indexes dropped (clear_specific_types with search_index only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes_dropped: Vec<String>,
}

/// Per-namespace key counts for the cache-statistics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceCount {
    pub pattern: String,
    pub description: String,
    pub keys: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub namespaces: Vec<NamespaceCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_bytes: Option<u64>,
}

/// Result of the nuclear clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuclearReport {
    pub flushed: bool,
    pub indexes_dropped: Vec<String>,
    pub errors: Vec<String>,
}

impl CacheLayer {
    /// Delete every key matching the fixed pattern list, preserving the
    /// `user:*` namespace. Individual pattern failures are reported, not
    /// fatal.
    pub async fn clear_all_except_user(&self) -> Result<ClearReport, NewscoreError> {
        self.clear_patterns(CLEAR_PATTERNS).await
    }

    /// Same as clear_all_except_user but restricted to named subsets.
    pub async fn clear_specific_types(
        &self,
        types: &[CacheType],
    ) -> Result<ClearReport, NewscoreError> {
        let mut patterns: Vec<(&str, &str)> = Vec::new();
        let mut drop_indexes = false;
        for t in types {
            if *t == CacheType::SearchIndex {
                drop_indexes = true;
            }
            patterns.extend_from_slice(t.patterns());
        }
        patterns.sort();
        patterns.dedup();
        let mut report = self.clear_patterns(&patterns).await?;
        if drop_indexes {
            match self.store().drop_all_indexes().await {
                Ok(dropped) => report.indexes_dropped = dropped,
                Err(e) => {
                    report.errors.push(format!("drop indexes: {}", e));
                    report.performance.error_count += 1;
                }
            }
        }
        Ok(report)
    }

    async fn clear_patterns(
        &self,
        patterns: &[(&str, &str)],
    ) -> Result<ClearReport, NewscoreError> {
        let started = Instant::now();
        let bytes_before = self.store().memory_used_bytes().await.unwrap_or(None);

        let mut reports = Vec::with_capacity(patterns.len());
        let mut errors = Vec::new();
        let mut total = 0u64;

        for (pattern, description) in patterns {
            let pattern_started = Instant::now();
            match self.store().delete_matching(pattern).await {
                Ok(count) => {
                    total += count;
                    reports.push(PatternReport {
                        pattern: pattern.to_string(),
                        description: description.to_string(),
                        keys_cleared: count,
                        time_ms: pattern_started.elapsed().as_millis() as u64,
                        error: None,
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    errors.push(format!("{}: {}", pattern, msg));
                    reports.push(PatternReport {
                        pattern: pattern.to_string(),
                        description: description.to_string(),
                        keys_cleared: 0,
                        time_ms: pattern_started.elapsed().as_millis() as u64,
                        error: Some(msg),
                    });
                }
            }
        }

        let bytes_after = self.store().memory_used_bytes().await.unwrap_or(None);
        let bytes_freed = match (bytes_before, bytes_after) {
            (Some(before), Some(after)) => Some(before.saturating_sub(after)),
            _ => None,
        };

        tracing::info!(
            total_keys = total,
            errors = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache clear complete"
        );

        Ok(ClearReport {
            patterns: reports,
            performance: ClearPerformance {
                total_keys_cleared: total,
                bytes_freed,
                elapsed_ms: started.elapsed().as_millis() as u64,
                error_count: errors.len(),
            },
            errors,
            indexes_dropped: Vec::new(),
        })
    }

    /// Flush every key in every database and drop every search index.
    /// Refuses (deleting nothing) unless `confirmation` is the literal
    /// token NUCLEAR. Capability gaps on the backend are reported per step
    /// rather than aborting.
    pub async fn nuclear_clear(&self, confirmation: &str) -> Result<NuclearReport, NewscoreError> {
        if confirmation != NUCLEAR_TOKEN {
            return Err(NewscoreError::validation(
                "confirmation",
                "Nuclear clear requires the literal confirmation token NUCLEAR",
            ));
        }

        let mut errors = Vec::new();

        let indexes_dropped = match self.store().drop_all_indexes().await {
            Ok(dropped) => dropped,
            Err(e) => {
                errors.push(format!("drop indexes: {}", e));
                Vec::new()
            }
        };

        let flushed = match self.store().flush_all().await {
            Ok(()) => true,
            Err(e) => {
                errors.push(format!("flush: {}", e));
                false
            }
        };

        tracing::warn!(
            flushed,
            indexes = indexes_dropped.len(),
            errors = errors.len(),
            "Nuclear clear executed"
        );

        Ok(NuclearReport {
            flushed,
            indexes_dropped,
            errors,
        })
    }

    /// Key counts per namespace plus store memory, for the
    /// cache-statistics endpoint.
    pub async fn statistics(&self) -> Result<CacheStatistics, NewscoreError> {
        let mut namespaces = Vec::with_capacity(CLEAR_PATTERNS.len() + 1);
        for (pattern, description) in CLEAR_PATTERNS.iter().chain(&[("user:*", "user records")]) {
            let keys = self.store().scan_match(pattern).await?.len() as u64;
            namespaces.push(NamespaceCount {
                pattern: pattern.to_string(),
                description: description.to_string(),
                keys,
            });
        }
        let memory_used_bytes = self.store().memory_used_bytes().await?;
        Ok(CacheStatistics {
            namespaces,
            memory_used_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::memory::MemoryStore;
    use crate::store::DataStore;
    use std::sync::Arc;

    fn layer() -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryStore::new()), CacheConfig::default())
    }

    async fn seed(store: &Arc<dyn DataStore>) {
        store.set("news:a1", "doc", None).await.unwrap();
        store.set("similar:a1:10:0", "payload", None).await.unwrap();
        store.set("user:u1:preferences", "prefs", None).await.unwrap();
        store.set("user:u1:read:a1", "ts", None).await.unwrap();
        store.set("article_views:a1", "3", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_all_preserves_user_namespace() {
        let cache = layer();
        seed(cache.store()).await;

        let report = cache.clear_all_except_user().await.unwrap();
        assert!(report.performance.total_keys_cleared >= 3);
        assert!(report.errors.is_empty());

        let store = cache.store();
        assert!(store.exists("user:u1:preferences").await.unwrap());
        assert!(store.exists("user:u1:read:a1").await.unwrap());
        assert!(!store.exists("news:a1").await.unwrap());
        assert!(!store.exists("similar:a1:10:0").await.unwrap());
        assert!(!store.exists("article_views:a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_specific_types_scopes_deletion() {
        let cache = layer();
        seed(cache.store()).await;

        cache
            .clear_specific_types(&[CacheType::SimilarArticles])
            .await
            .unwrap();

        let store = cache.store();
        assert!(!store.exists("similar:a1:10:0").await.unwrap());
        assert!(store.exists("news:a1").await.unwrap());
        assert!(store.exists("article_views:a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_nuclear_requires_token() {
        let cache = layer();
        seed(cache.store()).await;

        let err = cache.nuclear_clear("yes please").await.unwrap_err();
        assert!(matches!(err, NewscoreError::Validation { .. }));
        // Nothing was deleted
        assert!(cache.store().exists("news:a1").await.unwrap());

        let report = cache.nuclear_clear(NUCLEAR_TOKEN).await.unwrap();
        assert!(report.flushed);
        assert!(!cache.store().exists("news:a1").await.unwrap());
        assert!(!cache.store().exists("user:u1:preferences").await.unwrap());
    }

    #[test]
    fn test_cache_type_parse() {
        assert_eq!(CacheType::parse("articles"), Some(CacheType::Articles));
        assert_eq!(
            CacheType::parse("similar_articles"),
            Some(CacheType::SimilarArticles)
        );
        assert_eq!(CacheType::parse("bogus"), None);
    }
}
