/// Cache-management substrate
///
/// Read-through/write-through caches keyed by (subject, parameters), with
/// metadata sidecars, hit/miss statistics, store-side LRU sorted sets,
/// bloom membership hints, and hyper-log-log daily uniques.
///
/// Failure policy: a cache that cannot be read is a miss, a cache that
/// cannot be written is logged and forgotten. Only the admin paths
/// (admin.rs) surface cache errors to callers.

pub mod admin;
pub mod keys;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::errors::NewscoreError;
use crate::model::{RetrievalMethod, ScoredArticle};
use crate::store::DataStore;

/// Envelope format version; bump when the payload shape changes so stale
/// entries read as misses instead of deserialization errors.
pub const CACHE_VERSION: u32 = 1;

/// Cached payload: the pre-sliced ranked result list plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub results: Vec<ScoredArticle>,
    pub timestamp: DateTime<Utc>,
    pub method: RetrievalMethod,
    pub version: u32,
}

impl Envelope {
    pub fn new(results: Vec<ScoredArticle>, method: RetrievalMethod) -> Envelope {
        Envelope {
            results,
            timestamp: Utc::now(),
            method,
            version: CACHE_VERSION,
        }
    }

    /// Age of this entry in seconds.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.timestamp).num_seconds().max(0)
    }
}

/// Sidecar stored next to each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub total_count: u64,
    pub timestamp: DateTime<Utc>,
    pub method: RetrievalMethod,
    pub last_updated: DateTime<Utc>,
}

impl Sidecar {
    pub fn new(total_count: u64, method: RetrievalMethod) -> Sidecar {
        let now = Utc::now();
        Sidecar {
            total_count,
            timestamp: now,
            method,
            last_updated: now,
        }
    }
}

/// Hit/miss counters for one cache subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
}

pub struct CacheLayer {
    store: Arc<dyn DataStore>,
    cfg: CacheConfig,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn DataStore>, cfg: CacheConfig) -> CacheLayer {
        CacheLayer { store, cfg }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    /// Fetch payload and sidecar in one batched round trip. Any transport
    /// or decode failure reads as a miss.
    pub async fn probe(
        &self,
        payload_key: &str,
        sidecar_key: &str,
    ) -> Option<(Envelope, Sidecar)> {
        let (payload, sidecar) = match self.store.get_pair(payload_key, sidecar_key).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(key = %payload_key, error = %e, "Cache probe failed, treating as miss");
                return None;
            }
        };
        let envelope: Envelope = serde_json::from_str(&payload?).ok()?;
        if envelope.version != CACHE_VERSION {
            return None;
        }
        let sidecar: Sidecar = sidecar
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| Sidecar::new(envelope.results.len() as u64, envelope.method));
        Some((envelope, sidecar))
    }

    /// Write payload + sidecar, append the payload key onto the namespace
    /// LRU set (scored by now), trim the LRU to the configured population,
    /// and extend the LRU's own TTL to 24x the entry TTL. Errors are
    /// logged and swallowed — a failed write-back must not fail a request.
    pub async fn write(
        &self,
        payload_key: &str,
        sidecar_key: &str,
        lru_set: &str,
        envelope: &Envelope,
        sidecar: &Sidecar,
        ttl: Duration,
    ) {
        let result: Result<(), NewscoreError> = async {
            let payload = serde_json::to_string(envelope)?;
            let meta = serde_json::to_string(sidecar)?;
            self.store.set(payload_key, &payload, Some(ttl)).await?;
            self.store.set(sidecar_key, &meta, Some(ttl)).await?;
            let now_ms = Utc::now().timestamp_millis() as f64;
            self.store.zadd(lru_set, now_ms, payload_key).await?;
            self.store
                .zremrangebyrank(lru_set, 0, -(self.cfg.lru_max as i64) - 1)
                .await?;
            self.store.expire(lru_set, ttl * 24).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %payload_key, error = %e, "Cache write-back failed");
        }
    }

    /// Read a bare envelope (tombstone fallbacks).
    pub async fn get_envelope(&self, key: &str) -> Option<Envelope> {
        let raw = self.store.get(key).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Write a bare envelope (tombstone fallbacks). Logged and swallowed.
    pub async fn put_envelope(&self, key: &str, envelope: &Envelope, ttl: Duration) {
        let result: Result<(), NewscoreError> = async {
            let payload = serde_json::to_string(envelope)?;
            self.store.set(key, &payload, Some(ttl)).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Tombstone write failed");
        }
    }

    /// Generic read-through value cache (the all_articles list cache).
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    pub async fn put_value<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let result: Result<(), NewscoreError> = async {
            let raw = serde_json::to_string(value)?;
            self.store.set(key, &raw, Some(ttl)).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Value cache write failed");
        }
    }

    pub async fn record_hit(&self, stats_key: &str) {
        self.bump(stats_key, "cache_hits").await;
        self.bump(stats_key, "total_requests").await;
    }

    pub async fn record_miss(&self, stats_key: &str) {
        self.bump(stats_key, "cache_misses").await;
        self.bump(stats_key, "total_requests").await;
    }

    async fn bump(&self, stats_key: &str, field: &str) {
        if let Err(e) = self.store.hincr(stats_key, field, 1).await {
            tracing::debug!(key = %stats_key, field, error = %e, "Stats bump failed");
        }
    }

    pub async fn stats(&self, stats_key: &str) -> Result<CacheStats, NewscoreError> {
        let fields = self.store.hgetall(stats_key).await?;
        let get = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let hits = get("cache_hits");
        let misses = get("cache_misses");
        let total = get("total_requests");
        Ok(CacheStats {
            cache_hits: hits,
            cache_misses: misses,
            total_requests: total,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        })
    }

    /// Bloom membership hint for "recently computed". Best-effort.
    pub async fn mark_recent(&self, bloom_key: &str, member: &str, ttl: Duration) {
        if let Err(e) = self.store.bfadd(bloom_key, member).await {
            tracing::debug!(key = %bloom_key, error = %e, "Bloom add failed");
            return;
        }
        if let Err(e) = self.store.expire(bloom_key, ttl).await {
            tracing::debug!(key = %bloom_key, error = %e, "Bloom expire failed");
        }
    }

    pub async fn recently_computed(&self, bloom_key: &str, member: &str) -> bool {
        self.store.bfexists(bloom_key, member).await.unwrap_or(false)
    }

    /// Hyper-log-log daily unique counter. Best-effort.
    pub async fn daily_unique(&self, hll_key: &str, member: &str) {
        let result: Result<(), NewscoreError> = async {
            self.store.pfadd(hll_key, member).await?;
            self.store
                .expire(hll_key, Duration::from_secs(86_400 * 2))
                .await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::debug!(key = %hll_key, error = %e, "Daily unique add failed");
        }
    }

    /// Remove every cache artifact for one similar-articles subject:
    /// payloads (all limit/offset variants), sidecar, stats, bloom, and the
    /// LRU memberships of the deleted payload keys.
    pub async fn invalidate_similar(&self, article_id: &str) -> Result<u64, NewscoreError> {
        let payload_keys = self
            .store
            .scan_match(&format!("similar:{}:*", article_id))
            .await?;
        for key in &payload_keys {
            self.store.zrem(&keys::similar_lru(), key).await?;
        }
        let mut deleted = self.store.del(&payload_keys).await?;
        deleted += self
            .store
            .del(&[
                keys::similar_meta(article_id),
                keys::similar_stats(article_id),
                keys::similar_bloom(article_id),
            ])
            .await?;
        Ok(deleted)
    }

    /// Remove every personalization cache for one user: feed payloads,
    /// search payloads, and the preference-version guard. Called from
    /// preference updates, which must linearize with later reads.
    pub async fn invalidate_personalized(&self, user_id: &str) -> Result<u64, NewscoreError> {
        let mut deleted = self
            .store
            .delete_matching(&format!("personalized_simple:{}:*", user_id))
            .await?;
        deleted += self
            .store
            .delete_matching(&format!("personalized_search_simple:{}:*", user_id))
            .await?;
        deleted += self
            .store
            .del(&[keys::prefs_version(user_id)])
            .await?;
        Ok(deleted)
    }
}
