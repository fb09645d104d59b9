/// Redis-backed DataStore
///
/// Production backend over a single-primary Redis deployment with the
/// RediSearch and RedisJSON modules (RedisBloom optional). All the
/// query-language quirks live here: QueryNode compilation to FT syntax,
/// KNN dialect-2 parameters, JSONPath schema aliases, and reply parsing.
///
/// Bloom commands degrade to plain sets when the module is missing; the
/// downgrade is detected on first error and logged once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use crate::errors::NewscoreError;
use super::{
    DataStore, IndexSchema, QueryNode, RawKnnHit, RawSearchPage, SearchOptions, SortBy, TagField,
};

pub struct RedisStore {
    conn: ConnectionManager,
    index: IndexSchema,
    bloom_available: AtomicBool,
}

impl RedisStore {
    /// Connect and hold a multiplexed connection manager (reconnects
    /// transparently). The schema is kept for query compilation.
    pub async fn connect(url: &str, index: IndexSchema) -> Result<RedisStore, NewscoreError> {
        let client = Client::open(url)
            .map_err(|e| NewscoreError::Config(format!("Invalid redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisStore {
            conn,
            index,
            bloom_available: AtomicBool::new(true),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Escape a value for use inside a TAG filter.
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Strip query-syntax characters from a search term, preserving spaces so
/// multi-word terms stay phrases.
fn sanitize_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Compile a structured query into RediSearch syntax.
fn compile(node: &QueryNode) -> String {
    match node {
        QueryNode::All => "*".to_string(),
        QueryNode::And(children) => {
            let parts: Vec<String> = children.iter().map(compile).filter(|p| p != "*").collect();
            if parts.is_empty() {
                "*".to_string()
            } else {
                format!("({})", parts.join(" "))
            }
        }
        QueryNode::Or(children) => {
            let parts: Vec<String> = children.iter().map(compile).filter(|p| p != "*").collect();
            if parts.is_empty() {
                "*".to_string()
            } else {
                format!("({})", parts.join(" | "))
            }
        }
        QueryNode::Not(child) => format!("-{}", compile(child)),
        QueryNode::Text { fields, terms } => {
            let cleaned: Vec<String> = terms
                .iter()
                .map(|t| sanitize_term(t))
                .filter(|t| !t.is_empty())
                .map(|t| {
                    if t.contains(' ') {
                        format!("\"{}\"", t)
                    } else {
                        t
                    }
                })
                .collect();
            if cleaned.is_empty() || fields.is_empty() {
                return "*".to_string();
            }
            let field_list: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
            format!("@{}:({})", field_list.join("|"), cleaned.join("|"))
        }
        QueryNode::Tag { field, value } => {
            format!("@{}:{{{}}}", field.as_str(), escape_tag(value))
        }
        QueryNode::PublishedBetween { after, before } => {
            let lo = after
                .map(|t| t.timestamp().to_string())
                .unwrap_or_else(|| "-inf".to_string());
            let hi = before
                .map(|t| t.timestamp().to_string())
                .unwrap_or_else(|| "+inf".to_string());
            format!("@published_ts:[{} {}]", lo, hi)
        }
    }
}

/// Encode an f32 vector as the little-endian blob KNN parameters expect.
fn vector_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for f in vector {
        blob.extend_from_slice(&f.to_le_bytes());
    }
    blob
}

fn index_err(e: redis::RedisError) -> NewscoreError {
    NewscoreError::IndexUnavailable(e.to_string())
}

/// Parse an FT.SEARCH reply: [total, key, [field, value, ...], ...].
/// Returns (total, per-document field maps).
fn parse_search_reply(
    raw: &redis::Value,
) -> Result<(u64, Vec<HashMap<String, String>>), NewscoreError> {
    let items: Vec<redis::Value> =
        redis::from_redis_value(raw).map_err(|e| NewscoreError::IndexUnavailable(e.to_string()))?;
    if items.is_empty() {
        return Ok((0, Vec::new()));
    }
    let total: u64 = redis::from_redis_value(&items[0])
        .map_err(|e| NewscoreError::IndexUnavailable(e.to_string()))?;
    let mut docs = Vec::new();
    // Entries alternate: items[i] is the key, items[i + 1] the field/value array
    let mut i = 1;
    while i + 1 < items.len() {
        let fields: Vec<String> = redis::from_redis_value(&items[i + 1])
            .map_err(|e| NewscoreError::IndexUnavailable(e.to_string()))?;
        let mut map = HashMap::new();
        for pair in fields.chunks(2) {
            if pair.len() == 2 {
                map.insert(pair[0].clone(), pair[1].clone());
            }
        }
        docs.push(map);
        i += 2;
    }
    Ok((total, docs))
}

fn doc_from_map(map: &HashMap<String, String>) -> Option<serde_json::Value> {
    let raw = map.get("$")?;
    let parsed: serde_json::Value = serde_json::from_str(raw).ok()?;
    // JSON.GET with a $ path wraps the document in an array
    match parsed {
        serde_json::Value::Array(mut arr) if !arr.is_empty() => Some(arr.remove(0)),
        other => Some(other),
    }
}

#[async_trait]
impl DataStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        match ttl {
            Some(d) => {
                let _: () = conn.set_ex(key, value, d.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, NewscoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        Ok(conn.del(keys.to_vec()).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.incr(key, 1i64).await?)
    }

    async fn get_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(Option<String>, Option<String>), NewscoreError> {
        let mut conn = self.conn();
        let (a, b): (Option<String>, Option<String>) = redis::pipe()
            .get(first)
            .get(second)
            .query_async(&mut conn)
            .await?;
        Ok((a, b))
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.hincr(key, field, by).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.hgetall(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.scard(key).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.sismember(key, member).await?)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, NewscoreError> {
        let mut conn = self.conn();
        let members: Vec<String> = if rev {
            conn.zrevrange(key, start as isize, stop as isize).await?
        } else {
            conn.zrange(key, start as isize, stop as isize).await?
        };
        Ok(members)
    }

    async fn zremrangebyrank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn
            .zremrangebyrank(key, start as isize, stop as isize)
            .await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn lpush_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
    ) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: ((), ()) = redis::pipe()
            .lpush(key, value)
            .ltrim(key, 0, (max_len - 1) as isize)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = conn.pfadd(key, member).await?;
        Ok(())
    }

    async fn pfcount(&self, key: &str) -> Result<u64, NewscoreError> {
        let mut conn = self.conn();
        Ok(conn.pfcount(key).await?)
    }

    async fn bfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        if self.bloom_available.load(Ordering::Relaxed) {
            let mut conn = self.conn();
            let result: Result<i64, redis::RedisError> = redis::cmd("BF.ADD")
                .arg(key)
                .arg(member)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    self.bloom_available.store(false, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        "RedisBloom unavailable, falling back to plain sets for membership hints"
                    );
                }
            }
        }
        self.sadd(key, member).await
    }

    async fn bfexists(&self, key: &str, member: &str) -> Result<bool, NewscoreError> {
        if self.bloom_available.load(Ordering::Relaxed) {
            let mut conn = self.conn();
            let result: Result<i64, redis::RedisError> = redis::cmd("BF.EXISTS")
                .arg(key)
                .arg(member)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(v) => return Ok(v == 1),
                Err(e) => {
                    self.bloom_available.store(false, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        "RedisBloom unavailable, falling back to plain sets for membership hints"
                    );
                }
            }
        }
        self.sismember(key, member).await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, NewscoreError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, NewscoreError> {
        let keys = self.scan_match(pattern).await?;
        let mut deleted = 0u64;
        for chunk in keys.chunks(500) {
            deleted += self.del(chunk).await?;
        }
        Ok(deleted)
    }

    async fn memory_used_bytes(&self) -> Result<Option<u64>, NewscoreError> {
        let mut conn = self.conn();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await?;
        for line in info.lines() {
            if let Some(rest) = line.strip_prefix("used_memory:") {
                return Ok(rest.trim().parse::<u64>().ok());
            }
        }
        Ok(None)
    }

    async fn flush_all(&self) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_json(&self, key: &str, doc: &serde_json::Value) -> Result<(), NewscoreError> {
        // Inject the numeric publish timestamp the index sorts and
        // range-filters on; the RFC3339 field stays authoritative.
        let mut doc = doc.clone();
        if let Some(obj) = doc.as_object_mut() {
            if let Some(ts) = obj
                .get("published_at")
                .and_then(|v| v.as_str())
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            {
                obj.insert("published_ts".to_string(), serde_json::json!(ts.timestamp()));
            }
        }
        let mut conn = self.conn();
        let payload = serde_json::to_string(&doc)?;
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, NewscoreError> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .arg("$")
            .query_async(&mut conn)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let parsed: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(match parsed {
            serde_json::Value::Array(mut arr) if !arr.is_empty() => Some(arr.remove(0)),
            serde_json::Value::Null => None,
            other => Some(other),
        })
    }

    async fn search(
        &self,
        query: &QueryNode,
        opts: &SearchOptions,
    ) -> Result<RawSearchPage, NewscoreError> {
        let mut conn = self.conn();
        let compiled = compile(query);
        let order = match opts.sort_by {
            SortBy::PublishedAtDesc => "DESC",
            SortBy::PublishedAtAsc => "ASC",
        };
        let raw: redis::Value = redis::cmd("FT.SEARCH")
            .arg(&self.index.name)
            .arg(&compiled)
            .arg("SORTBY")
            .arg("published_ts")
            .arg(order)
            .arg("LIMIT")
            .arg(opts.offset)
            .arg(opts.limit)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .map_err(index_err)?;
        let (total, maps) = parse_search_reply(&raw)?;
        let docs = maps.iter().filter_map(doc_from_map).collect();
        Ok(RawSearchPage { docs, total })
    }

    async fn knn(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryNode>,
    ) -> Result<Vec<RawKnnHit>, NewscoreError> {
        let mut conn = self.conn();
        let prefilter = filter.map(compile).unwrap_or_else(|| "*".to_string());
        let query = format!("({})=>[KNN {} @vector $vec AS __dist]", prefilter, k);
        let raw: redis::Value = redis::cmd("FT.SEARCH")
            .arg(&self.index.name)
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(vector_blob(vector))
            .arg("SORTBY")
            .arg("__dist")
            .arg("ASC")
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .arg("RETURN")
            .arg(2)
            .arg("$")
            .arg("__dist")
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .map_err(index_err)?;
        let (_, maps) = parse_search_reply(&raw)?;
        let hits = maps
            .iter()
            .filter_map(|map| {
                let doc = doc_from_map(map)?;
                let distance = map.get("__dist")?.parse::<f64>().ok()?;
                Some(RawKnnHit { doc, distance })
            })
            .collect();
        Ok(hits)
    }

    async fn tag_values(&self, field: TagField) -> Result<Vec<String>, NewscoreError> {
        let mut conn = self.conn();
        let raw: redis::Value = redis::cmd("FT.AGGREGATE")
            .arg(&self.index.name)
            .arg("*")
            .arg("GROUPBY")
            .arg(1)
            .arg(format!("@{}", field.as_str()))
            .arg("REDUCE")
            .arg("COUNT")
            .arg(0)
            .arg("AS")
            .arg("count")
            .arg("LIMIT")
            .arg(0)
            .arg(1000)
            .query_async(&mut conn)
            .await
            .map_err(index_err)?;
        let items: Vec<redis::Value> = redis::from_redis_value(&raw).map_err(index_err)?;
        let mut values = Vec::new();
        for item in items.iter().skip(1) {
            let Ok(fields) = redis::from_redis_value::<Vec<String>>(item) else {
                continue;
            };
            for pair in fields.chunks(2) {
                if pair.len() == 2 && pair[0] == field.as_str() {
                    values.push(pair[1].clone());
                }
            }
        }
        values.sort();
        values.dedup();
        Ok(values)
    }

    async fn ensure_index(&self, schema: &IndexSchema) -> Result<(), NewscoreError> {
        let mut conn = self.conn();
        let result: Result<(), redis::RedisError> = redis::cmd("FT.CREATE")
            .arg(&schema.name)
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(&schema.prefix)
            .arg("SCHEMA")
            .arg("$.title")
            .arg("AS")
            .arg("title")
            .arg("TEXT")
            .arg("$.description")
            .arg("AS")
            .arg("description")
            .arg("TEXT")
            .arg("$.content")
            .arg("AS")
            .arg("content")
            .arg("TEXT")
            .arg("$.summary")
            .arg("AS")
            .arg("summary")
            .arg("TEXT")
            .arg("$.keywords[*]")
            .arg("AS")
            .arg("keywords")
            .arg("TEXT")
            .arg("$.sentiment")
            .arg("AS")
            .arg("sentiment")
            .arg("TAG")
            .arg("$.source.name")
            .arg("AS")
            .arg("source_name")
            .arg("TAG")
            .arg("$.published_ts")
            .arg("AS")
            .arg("published_ts")
            .arg("NUMERIC")
            .arg("SORTABLE")
            .arg("$.vector")
            .arg("AS")
            .arg("vector")
            .arg("VECTOR")
            .arg("FLAT")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(schema.dimension)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => Ok(()),
            Err(e) => Err(index_err(e)),
        }
    }

    async fn drop_all_indexes(&self) -> Result<Vec<String>, NewscoreError> {
        let mut conn = self.conn();
        let names: Vec<String> = redis::cmd("FT._LIST")
            .query_async(&mut conn)
            .await
            .map_err(index_err)?;
        let mut dropped = Vec::new();
        for name in names {
            let result: Result<(), redis::RedisError> = redis::cmd("FT.DROPINDEX")
                .arg(&name)
                .query_async(&mut conn)
                .await;
            match result {
                Ok(()) => dropped.push(name),
                Err(e) => {
                    tracing::warn!(index = %name, error = %e, "Failed to drop search index");
                }
            }
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TextField;
    use chrono::TimeZone;

    #[test]
    fn test_compile_text_multi_field() {
        let q = QueryNode::Text {
            fields: vec![TextField::Title, TextField::Summary],
            terms: vec!["rocket".to_string(), "launch pad".to_string()],
        };
        assert_eq!(compile(&q), "@title|summary:(rocket|\"launch pad\")");
    }

    #[test]
    fn test_compile_tag_escapes_punctuation() {
        let q = QueryNode::Tag {
            field: TagField::SourceName,
            value: "the-wire".to_string(),
        };
        assert_eq!(compile(&q), "@source_name:{the\\-wire}");
    }

    #[test]
    fn test_compile_and_or_not() {
        let q = QueryNode::And(vec![
            QueryNode::Or(vec![
                QueryNode::Tag {
                    field: TagField::Sentiment,
                    value: "positive".to_string(),
                },
                QueryNode::Tag {
                    field: TagField::Sentiment,
                    value: "neutral".to_string(),
                },
            ]),
            QueryNode::Not(Box::new(QueryNode::Tag {
                field: TagField::SourceName,
                value: "spam".to_string(),
            })),
        ]);
        assert_eq!(
            compile(&q),
            "((@sentiment:{positive} | @sentiment:{neutral}) -@source_name:{spam})"
        );
    }

    #[test]
    fn test_compile_published_between() {
        let after = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = QueryNode::PublishedBetween {
            after: Some(after),
            before: None,
        };
        assert_eq!(compile(&q), format!("@published_ts:[{} +inf]", after.timestamp()));
    }

    #[test]
    fn test_compile_empty_terms_matches_all() {
        let q = QueryNode::Text {
            fields: vec![TextField::Title],
            terms: vec!["!!!".to_string()],
        };
        assert_eq!(compile(&q), "*");
    }

    #[test]
    fn test_vector_blob_little_endian() {
        let blob = vector_blob(&[1.0f32]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
    }
}
