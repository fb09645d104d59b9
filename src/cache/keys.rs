/// Persisted key layout
///
/// Every key the core writes is built here so the namespace map stays in
/// one place. Admin clearing patterns (admin.rs) must stay in sync with
/// these builders.

/// `news:{id}` — authoritative article document.
pub fn article(id: &str) -> String {
    format!("news:{}", id)
}

/// `all_articles:{limit}:{offset}` — list cache.
pub fn all_articles(limit: usize, offset: usize) -> String {
    format!("all_articles:{}:{}", limit, offset)
}

/// `similar:{id}:{limit}:{offset}` — similar-article payload.
pub fn similar(id: &str, limit: usize, offset: usize) -> String {
    format!("similar:{}:{}:{}", id, limit, offset)
}

/// `similar_meta:{id}` — similar-article sidecar.
pub fn similar_meta(id: &str) -> String {
    format!("similar_meta:{}", id)
}

/// `similar_stats:{id}` — hit/miss counters.
pub fn similar_stats(id: &str) -> String {
    format!("similar_stats:{}", id)
}

/// `similar_lru` — eviction helper for the similar namespace.
pub fn similar_lru() -> String {
    "similar_lru".to_string()
}

/// `similar_bloom:{id}` — recently-computed membership hint.
pub fn similar_bloom(id: &str) -> String {
    format!("similar_bloom:{}", id)
}

/// `similar:{id}:fallback` — tombstone with the last-known-good result.
pub fn similar_fallback(id: &str) -> String {
    format!("similar:{}:fallback", id)
}

/// `similar_unique_articles:{date}` — daily uniques hyper-log-log.
pub fn similar_unique(date: &str) -> String {
    format!("similar_unique_articles:{}", date)
}

/// `temp:similarity:{target}:{epoch_ms}` — scratch sorted set for rank fusion.
pub fn temp_similarity(target: &str, epoch_ms: i64) -> String {
    format!("temp:similarity:{}:{}", target, epoch_ms)
}

/// `user:{userId}:preferences` — preference document.
pub fn preferences(user_id: &str) -> String {
    format!("user:{}:preferences", user_id)
}

/// `personalized_simple:{uid}:{limit}:{offset}` — feed payload.
pub fn personalized(user_id: &str, limit: usize, offset: usize) -> String {
    format!("personalized_simple:{}:{}:{}", user_id, limit, offset)
}

/// `prefs_version_simple:{uid}` — preference-version guard.
pub fn prefs_version(user_id: &str) -> String {
    format!("prefs_version_simple:{}", user_id)
}

/// `personalized_stats_simple:{uid}` — feed hit/miss counters.
pub fn personalized_stats(user_id: &str) -> String {
    format!("personalized_stats_simple:{}", user_id)
}

/// `personalized_search_simple:{uid}:{hash}:{limit}:{offset}` — search payload.
pub fn personalized_search(user_id: &str, hash: &str, limit: usize, offset: usize) -> String {
    format!(
        "personalized_search_simple:{}:{}:{}:{}",
        user_id, hash, limit, offset
    )
}

/// `user:{userId}:read:{articleId}` — per-article read marker.
pub fn read(user_id: &str, article_id: &str) -> String {
    format!("user:{}:read:{}", user_id, article_id)
}

/// `user:{userId}:read_set` — read markers ordered by view time.
pub fn read_set(user_id: &str) -> String {
    format!("user:{}:read_set", user_id)
}

/// `article_views:{id}` — total view counter.
pub fn views(id: &str) -> String {
    format!("article_views:{}", id)
}

/// `article_unique_views:{id}` — hashed-IP set.
pub fn unique_views(id: &str) -> String {
    format!("article_unique_views:{}", id)
}

/// `article_user_views:{id}` — viewer userId set.
pub fn user_views(id: &str) -> String {
    format!("article_user_views:{}", id)
}

/// `user_article_views:{userId}` — per-user view history map.
pub fn user_article_views(user_id: &str) -> String {
    format!("user_article_views:{}", user_id)
}

/// `article_daily_views:{id}:{YYYY-MM-DD}` — rolling daily counters.
pub fn daily_views(id: &str, date: &str) -> String {
    format!("article_daily_views:{}:{}", id, date)
}

/// `article_engagement:{id}` — bounded engagement ring buffer.
pub fn engagement(id: &str) -> String {
    format!("article_engagement:{}", id)
}

/// `article_last_viewed:{id}` — last view timestamp.
pub fn last_viewed(id: &str) -> String {
    format!("article_last_viewed:{}", id)
}
