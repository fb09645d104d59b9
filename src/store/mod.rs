/// Data-plane abstraction layer
///
/// Provides the DataStore trait: raw string/hash/set/sorted-set/list
/// primitives, probabilistic sketches (hyper-log-log, bloom), JSON document
/// storage, and the combined full-text + tag + vector search index. The
/// trait abstraction enables multiple backends — Redis in production, an
/// in-process store for tests and self-hosted runs.
///
/// Queries are structured (`QueryNode`), never raw query-language strings;
/// each backend compiles them, which keeps index quirks out of the engines.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::NewscoreError;

pub mod memory;
pub mod redis;

/// Text fields of the article index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Title,
    Description,
    Content,
    Summary,
    Keywords,
}

impl TextField {
    pub const ALL: [TextField; 5] = [
        TextField::Title,
        TextField::Description,
        TextField::Content,
        TextField::Summary,
        TextField::Keywords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::Title => "title",
            TextField::Description => "description",
            TextField::Content => "content",
            TextField::Summary => "summary",
            TextField::Keywords => "keywords",
        }
    }
}

/// Tag fields of the article index (exact-match filters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    Sentiment,
    SourceName,
}

impl TagField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagField::Sentiment => "sentiment",
            TagField::SourceName => "source_name",
        }
    }
}

/// Structured search query. Backends compile this into their native query
/// language (RediSearch syntax for Redis, direct evaluation in-process).
#[derive(Debug, Clone)]
pub enum QueryNode {
    /// Match everything.
    All,
    /// All children must match.
    And(Vec<QueryNode>),
    /// Any child must match.
    Or(Vec<QueryNode>),
    /// Child must not match.
    Not(Box<QueryNode>),
    /// Any of `terms` appears in any of `fields`. Multi-word terms are
    /// treated as phrases.
    Text {
        fields: Vec<TextField>,
        terms: Vec<String>,
    },
    /// Exact tag filter, e.g. sentiment:{positive}.
    Tag { field: TagField, value: String },
    /// published_at within [after, before] (inclusive).
    PublishedBetween {
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
}

impl QueryNode {
    /// A term query across every text field — the expansion used for both
    /// free-text search and topic search.
    pub fn text_all_fields(terms: Vec<String>) -> QueryNode {
        QueryNode::Text {
            fields: TextField::ALL.to_vec(),
            terms,
        }
    }
}

/// Sort order for text search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    PublishedAtDesc,
    PublishedAtAsc,
}

/// Options for text search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub sort_by: SortBy,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            sort_by: SortBy::PublishedAtDesc,
            limit: 10,
            offset: 0,
        }
    }
}

/// A page of raw documents from the index plus the total match count.
#[derive(Debug, Clone)]
pub struct RawSearchPage {
    pub docs: Vec<serde_json::Value>,
    pub total: u64,
}

/// A raw KNN hit: document plus cosine distance (1 - similarity).
#[derive(Debug, Clone)]
pub struct RawKnnHit {
    pub doc: serde_json::Value,
    pub distance: f64,
}

/// Schema for the composite article index. Pins the vector dimension and
/// distance metric; changing either requires a re-index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub prefix: String,
    pub dimension: usize,
}

impl IndexSchema {
    pub fn articles(dimension: usize) -> IndexSchema {
        IndexSchema {
            name: "news_idx".to_string(),
            prefix: "news:".to_string(),
            dimension,
        }
    }
}

/// Core abstraction over the backing data plane.
///
/// All implementations must be Send + Sync to support concurrent access.
/// Counters and set updates are store-native atomics; there is no
/// inter-request mutual exclusion above this layer.
#[async_trait]
pub trait DataStore: Send + Sync {
    // --- strings / counters ---

    async fn get(&self, key: &str) -> Result<Option<String>, NewscoreError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), NewscoreError>;

    async fn del(&self, keys: &[String]) -> Result<u64, NewscoreError>;

    async fn exists(&self, key: &str) -> Result<bool, NewscoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), NewscoreError>;

    /// Atomic increment; returns the new value.
    async fn incr(&self, key: &str) -> Result<i64, NewscoreError>;

    /// Fetch two keys in a single round trip (cache payload + sidecar probe).
    async fn get_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(Option<String>, Option<String>), NewscoreError>;

    // --- hashes ---

    /// Atomic hash-field increment; returns the new value.
    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, NewscoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), NewscoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, NewscoreError>;

    // --- sets ---

    async fn sadd(&self, key: &str, member: &str) -> Result<(), NewscoreError>;

    async fn scard(&self, key: &str) -> Result<u64, NewscoreError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, NewscoreError>;

    // --- sorted sets ---

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), NewscoreError>;

    /// Range by rank. `rev` returns descending score order.
    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, NewscoreError>;

    async fn zremrangebyrank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, NewscoreError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<(), NewscoreError>;

    // --- lists ---

    /// Push to the head and trim to `max_len` in one batched step (bounded
    /// ring buffer).
    async fn lpush_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
    ) -> Result<(), NewscoreError>;

    async fn lrange(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<String>, NewscoreError>;

    // --- sketches ---

    /// Hyper-log-log add. Backends without a sketch may count exactly; the
    /// contract is cardinality estimation, not precision.
    async fn pfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError>;

    async fn pfcount(&self, key: &str) -> Result<u64, NewscoreError>;

    /// Bloom-filter membership add. Best-effort hint, never authoritative.
    async fn bfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError>;

    async fn bfexists(&self, key: &str, member: &str) -> Result<bool, NewscoreError>;

    // --- admin / introspection ---

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, NewscoreError>;

    /// Delete every key matching a glob pattern; returns the count deleted.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, NewscoreError>;

    /// Bytes of memory the store reports as used, when the backend exposes it.
    async fn memory_used_bytes(&self) -> Result<Option<u64>, NewscoreError>;

    /// Delete every key in every database. The nuclear path only.
    async fn flush_all(&self) -> Result<(), NewscoreError>;

    async fn ping(&self) -> Result<(), NewscoreError>;

    // --- document + index plane ---

    async fn put_json(&self, key: &str, doc: &serde_json::Value) -> Result<(), NewscoreError>;

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, NewscoreError>;

    async fn search(
        &self,
        query: &QueryNode,
        opts: &SearchOptions,
    ) -> Result<RawSearchPage, NewscoreError>;

    /// K-nearest-neighbor search over stored vectors, cosine distance
    /// ascending. `filter` restricts the candidate set.
    async fn knn(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryNode>,
    ) -> Result<Vec<RawKnnHit>, NewscoreError>;

    /// Distinct values of a tag field (source aggregation).
    async fn tag_values(&self, field: TagField) -> Result<Vec<String>, NewscoreError>;

    /// Drop and recreate the composite index from the schema. A
    /// pre-existing index is acceptable.
    async fn ensure_index(&self, schema: &IndexSchema) -> Result<(), NewscoreError>;

    /// Drop every search index; returns the names dropped.
    async fn drop_all_indexes(&self) -> Result<Vec<String>, NewscoreError>;
}

/// Cosine similarity between two vectors. Returns 0.0 for mismatched or
/// zero-norm inputs rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
