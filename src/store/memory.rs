/// In-process DataStore backend
///
/// Backs tests and self-hosted deployments that run without Redis. Every
/// structure lives behind one tokio RwLock; TTLs are enforced lazily on
/// access. The hyper-log-log and bloom surfaces are exact sets here — the
/// trait promises membership/cardinality semantics, not sketch precision.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::NewscoreError;
use super::{
    DataStore, IndexSchema, QueryNode, RawKnnHit, RawSearchPage, SearchOptions, SortBy, TagField,
    TextField, cosine_similarity,
};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Option<Duration>) -> Expiring<T> {
        Expiring {
            value,
            expires_at: ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default()),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| t <= Utc::now()).unwrap_or(false)
    }
}

/// Drop the entry when expired, otherwise hand back a mutable reference.
fn live<'a, T>(
    map: &'a mut HashMap<String, Expiring<T>>,
    key: &str,
) -> Option<&'a mut Expiring<T>> {
    if map.get(key).map(|e| e.is_expired()).unwrap_or(false) {
        map.remove(key);
        return None;
    }
    map.get_mut(key)
}

/// Drop an expired entry without touching a live one.
fn purge<T>(map: &mut HashMap<String, Expiring<T>>, key: &str) {
    if map.get(key).map(|e| e.is_expired()).unwrap_or(false) {
        map.remove(key);
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Expiring<String>>,
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
    sets: HashMap<String, Expiring<HashSet<String>>>,
    zsets: HashMap<String, Expiring<Vec<(f64, String)>>>,
    lists: HashMap<String, Expiring<VecDeque<String>>>,
    hlls: HashMap<String, Expiring<HashSet<String>>>,
    blooms: HashMap<String, Expiring<HashSet<String>>>,
    docs: HashMap<String, Expiring<serde_json::Value>>,
    index: Option<IndexSchema>,
}

impl Inner {
    fn all_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for k in self.strings.keys() {
            keys.push(k.clone());
        }
        for k in self.hashes.keys() {
            keys.push(k.clone());
        }
        for k in self.sets.keys() {
            keys.push(k.clone());
        }
        for k in self.zsets.keys() {
            keys.push(k.clone());
        }
        for k in self.lists.keys() {
            keys.push(k.clone());
        }
        for k in self.hlls.keys() {
            keys.push(k.clone());
        }
        for k in self.blooms.keys() {
            keys.push(k.clone());
        }
        for k in self.docs.keys() {
            keys.push(k.clone());
        }
        keys
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let mut removed = false;
        removed |= self.strings.remove(key).is_some();
        removed |= self.hashes.remove(key).is_some();
        removed |= self.sets.remove(key).is_some();
        removed |= self.zsets.remove(key).is_some();
        removed |= self.lists.remove(key).is_some();
        removed |= self.hlls.remove(key).is_some();
        removed |= self.blooms.remove(key).is_some();
        removed |= self.docs.remove(key).is_some();
        removed
    }

    fn drop_expired(&mut self) {
        self.strings.retain(|_, e| !e.is_expired());
        self.hashes.retain(|_, e| !e.is_expired());
        self.sets.retain(|_, e| !e.is_expired());
        self.zsets.retain(|_, e| !e.is_expired());
        self.lists.retain(|_, e| !e.is_expired());
        self.hlls.retain(|_, e| !e.is_expired());
        self.blooms.retain(|_, e| !e.is_expired());
        self.docs.retain(|_, e| !e.is_expired());
    }
}

/// In-memory backend. Cheap to construct per test; share via Arc elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

/// Resolve a Redis-style rank range against a collection length: negative
/// indexes count from the end, start clamps to 0, and a stop that resolves
/// below zero yields an empty range (so trimming an under-capacity set
/// removes nothing).
fn resolve_range(len: i64, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let mut s = if start < 0 { len + start } else { start };
    if s < 0 {
        s = 0;
    }
    let mut e = if stop < 0 { len + stop } else { stop };
    if e > len - 1 {
        e = len - 1;
    }
    if e < 0 || s > e || s >= len {
        return None;
    }
    Some((s as usize, e as usize))
}

/// Glob match supporting `*` wildcards (the subset SCAN patterns use here).
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !key.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return key.len() >= pos && key[pos..].ends_with(part);
        } else {
            match key[pos..].find(part) {
                Some(idx) => pos += idx + part.len(),
                None => return false,
            }
        }
    }
    true
}

fn doc_text(doc: &serde_json::Value, field: TextField) -> String {
    match field {
        TextField::Keywords => doc["keywords"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default(),
        other => doc[other.as_str()].as_str().unwrap_or_default().to_string(),
    }
}

fn doc_tag(doc: &serde_json::Value, field: TagField) -> Option<String> {
    match field {
        TagField::Sentiment => doc["sentiment"].as_str().map(|s| s.to_string()),
        TagField::SourceName => doc["source"]["name"].as_str().map(|s| s.to_string()),
    }
}

fn doc_published_at(doc: &serde_json::Value) -> Option<DateTime<Utc>> {
    doc["published_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Evaluate a structured query against a stored document.
fn eval(node: &QueryNode, doc: &serde_json::Value) -> bool {
    match node {
        QueryNode::All => true,
        QueryNode::And(children) => children.iter().all(|c| eval(c, doc)),
        QueryNode::Or(children) => children.iter().any(|c| eval(c, doc)),
        QueryNode::Not(child) => !eval(child, doc),
        QueryNode::Text { fields, terms } => {
            if terms.is_empty() {
                return true;
            }
            terms.iter().any(|term| {
                let term = term.to_lowercase();
                fields.iter().any(|f| {
                    let text = doc_text(doc, *f);
                    if term.contains(' ') {
                        text.to_lowercase().contains(&term)
                    } else {
                        tokens(&text).iter().any(|t| t == &term)
                    }
                })
            })
        }
        QueryNode::Tag { field, value } => doc_tag(doc, *field)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false),
        QueryNode::PublishedBetween { after, before } => {
            let Some(ts) = doc_published_at(doc) else {
                return false;
            };
            if let Some(a) = after {
                if ts < *a {
                    return false;
                }
            }
            if let Some(b) = before {
                if ts > *b {
                    return false;
                }
            }
            true
        }
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.strings, key).map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        inner
            .strings
            .insert(key.to_string(), Expiring::new(value.to_string(), ttl));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, NewscoreError> {
        let mut inner = self.inner.write().await;
        let mut count = 0u64;
        for key in keys {
            if inner.remove_key(key) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        Ok(inner.all_keys().iter().any(|k| k == key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        let deadline = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        if let Some(e) = live(&mut inner.strings, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.hashes, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.sets, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.zsets, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.lists, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.hlls, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.blooms, key) {
            e.expires_at = Some(deadline);
        } else if let Some(e) = live(&mut inner.docs, key) {
            e.expires_at = Some(deadline);
        }
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, NewscoreError> {
        let mut inner = self.inner.write().await;
        let entry = live(&mut inner.strings, key);
        let next = match entry {
            Some(e) => {
                let current: i64 = e.value.parse().unwrap_or(0);
                e.value = (current + 1).to_string();
                current + 1
            }
            None => {
                inner
                    .strings
                    .insert(key.to_string(), Expiring::new("1".to_string(), None));
                1
            }
        };
        Ok(next)
    }

    async fn get_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(Option<String>, Option<String>), NewscoreError> {
        let mut inner = self.inner.write().await;
        let a = live(&mut inner.strings, first).map(|e| e.value.clone());
        let b = live(&mut inner.strings, second).map(|e| e.value.clone());
        Ok((a, b))
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.hashes, key);
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashMap::new(), None));
        let slot = entry.value.entry(field.to_string()).or_insert_with(|| "0".to_string());
        let next = slot.parse::<i64>().unwrap_or(0) + by;
        *slot = next.to_string();
        Ok(next)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.hashes, key);
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashMap::new(), None));
        entry.value.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.hashes, key)
            .map(|e| e.value.clone())
            .unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.sets, key);
        let entry = inner
            .sets
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashSet::new(), None));
        entry.value.insert(member.to_string());
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<u64, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.sets, key)
            .map(|e| e.value.len() as u64)
            .unwrap_or(0))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.sets, key)
            .map(|e| e.value.contains(member))
            .unwrap_or(false))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.zsets, key);
        let entry = inner
            .zsets
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(Vec::new(), None));
        entry.value.retain(|(_, m)| m != member);
        entry.value.push((score, member.to_string()));
        entry
            .value
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        Ok(())
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = live(&mut inner.zsets, key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<String> = entry.value.iter().map(|(_, m)| m.clone()).collect();
        if rev {
            members.reverse();
        }
        let Some((s, e)) = resolve_range(members.len() as i64, start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[s..=e].to_vec())
    }

    async fn zremrangebyrank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, NewscoreError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = live(&mut inner.zsets, key) else {
            return Ok(0);
        };
        let Some((s, e)) = resolve_range(entry.value.len() as i64, start, stop) else {
            return Ok(0);
        };
        let removed = (e - s + 1) as u64;
        entry.value.drain(s..=e);
        Ok(removed)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = live(&mut inner.zsets, key) {
            entry.value.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn lpush_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
    ) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.lists, key);
        let entry = inner
            .lists
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(VecDeque::new(), None));
        entry.value.push_front(value.to_string());
        entry.value.truncate(max_len.max(0) as usize);
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        let Some(entry) = live(&mut inner.lists, key) else {
            return Ok(Vec::new());
        };
        let Some((s, e)) = resolve_range(entry.value.len() as i64, start, stop) else {
            return Ok(Vec::new());
        };
        Ok(entry.value.iter().skip(s).take(e - s + 1).cloned().collect())
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.hlls, key);
        let entry = inner
            .hlls
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashSet::new(), None));
        entry.value.insert(member.to_string());
        Ok(())
    }

    async fn pfcount(&self, key: &str) -> Result<u64, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.hlls, key)
            .map(|e| e.value.len() as u64)
            .unwrap_or(0))
    }

    async fn bfadd(&self, key: &str, member: &str) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        purge(&mut inner.blooms, key);
        let entry = inner
            .blooms
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashSet::new(), None));
        entry.value.insert(member.to_string());
        Ok(())
    }

    async fn bfexists(&self, key: &str, member: &str) -> Result<bool, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.blooms, key)
            .map(|e| e.value.contains(member))
            .unwrap_or(false))
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        Ok(inner
            .all_keys()
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .collect())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        let matching: Vec<String> = inner
            .all_keys()
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .collect();
        let mut count = 0u64;
        for key in &matching {
            if inner.remove_key(key) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn memory_used_bytes(&self) -> Result<Option<u64>, NewscoreError> {
        // No cheap accounting for process-local maps.
        Ok(None)
    }

    async fn flush_all(&self) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
        Ok(())
    }

    async fn ping(&self) -> Result<(), NewscoreError> {
        Ok(())
    }

    async fn put_json(&self, key: &str, doc: &serde_json::Value) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        inner
            .docs
            .insert(key.to_string(), Expiring::new(doc.clone(), None));
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(live(&mut inner.docs, key).map(|e| e.value.clone()))
    }

    async fn search(
        &self,
        query: &QueryNode,
        opts: &SearchOptions,
    ) -> Result<RawSearchPage, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        let prefix = inner
            .index
            .as_ref()
            .map(|s| s.prefix.clone())
            .unwrap_or_else(|| "news:".to_string());
        let mut matched: Vec<serde_json::Value> = inner
            .docs
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .filter(|(_, e)| eval(query, &e.value))
            .map(|(_, e)| e.value.clone())
            .collect();
        matched.sort_by(|a, b| {
            let ta = doc_published_at(a);
            let tb = doc_published_at(b);
            match opts.sort_by {
                SortBy::PublishedAtDesc => tb.cmp(&ta),
                SortBy::PublishedAtAsc => ta.cmp(&tb),
            }
        });
        let total = matched.len() as u64;
        let docs = matched
            .into_iter()
            .skip(opts.offset)
            .take(opts.limit)
            .collect();
        Ok(RawSearchPage { docs, total })
    }

    async fn knn(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryNode>,
    ) -> Result<Vec<RawKnnHit>, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        let prefix = inner
            .index
            .as_ref()
            .map(|s| s.prefix.clone())
            .unwrap_or_else(|| "news:".to_string());
        let mut hits: Vec<RawKnnHit> = inner
            .docs
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, e)| filter.map(|f| eval(f, &e.value)).unwrap_or(true))
            .filter_map(|(_, e)| {
                let stored: Vec<f32> = e.value["vector"]
                    .as_array()?
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect();
                if stored.is_empty() {
                    return None;
                }
                let distance = 1.0 - cosine_similarity(vector, &stored);
                Some(RawKnnHit {
                    doc: e.value.clone(),
                    distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn tag_values(&self, field: TagField) -> Result<Vec<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.drop_expired();
        let mut values: Vec<String> = inner
            .docs
            .iter()
            .filter(|(k, _)| k.starts_with("news:"))
            .filter_map(|(_, e)| doc_tag(&e.value, field))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        values.sort();
        Ok(values)
    }

    async fn ensure_index(&self, schema: &IndexSchema) -> Result<(), NewscoreError> {
        let mut inner = self.inner.write().await;
        inner.index = Some(schema.clone());
        Ok(())
    }

    async fn drop_all_indexes(&self) -> Result<Vec<String>, NewscoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.index.take().map(|s| vec![s.name]).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_string_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_is_monotonic() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.incr("c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zset_ordering_and_trim() {
        let store = MemoryStore::new();
        store.zadd("z", 3.0, "c").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        assert_eq!(
            store.zrange("z", 0, -1, true).await.unwrap(),
            vec!["c", "b", "a"]
        );
        // Remove all but the 2 highest-ranked
        store.zremrangebyrank("z", 0, 0).await.unwrap();
        assert_eq!(
            store.zrange("z", 0, -1, true).await.unwrap(),
            vec!["c", "b"]
        );
    }

    #[tokio::test]
    async fn test_list_ring_buffer() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .lpush_trim("l", &format!("v{}", i), 3)
                .await
                .unwrap();
        }
        let items = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(items, vec!["v4", "v3", "v2"]);
    }

    #[tokio::test]
    async fn test_glob_delete_preserves_other_namespaces() {
        let store = MemoryStore::new();
        store.set("similar:a:10:0", "x", None).await.unwrap();
        store.set("similar_meta:a", "x", None).await.unwrap();
        store.set("user:u1:preferences", "x", None).await.unwrap();
        let deleted = store.delete_matching("similar*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.exists("user:u1:preferences").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_text_and_tag() {
        let store = MemoryStore::new();
        store
            .put_json(
                "news:1",
                &json!({
                    "title": "Rocket launch succeeds",
                    "sentiment": "positive",
                    "source": {"name": "spacenews"},
                    "published_at": "2024-01-02T00:00:00Z"
                }),
            )
            .await
            .unwrap();
        store
            .put_json(
                "news:2",
                &json!({
                    "title": "Markets slide",
                    "sentiment": "negative",
                    "source": {"name": "bizwire"},
                    "published_at": "2024-01-03T00:00:00Z"
                }),
            )
            .await
            .unwrap();

        let q = QueryNode::And(vec![
            QueryNode::Text {
                fields: vec![TextField::Title],
                terms: vec!["rocket".to_string()],
            },
            QueryNode::Tag {
                field: TagField::Sentiment,
                value: "positive".to_string(),
            },
        ]);
        let page = store.search(&q, &SearchOptions::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.docs[0]["title"], "Rocket launch succeeds");
    }

    #[tokio::test]
    async fn test_knn_orders_by_distance() {
        let store = MemoryStore::new();
        store
            .put_json(
                "news:a",
                &json!({"title": "a", "published_at": "2024-01-01T00:00:00Z", "vector": [1.0, 0.0]}),
            )
            .await
            .unwrap();
        store
            .put_json(
                "news:b",
                &json!({"title": "b", "published_at": "2024-01-01T00:00:00Z", "vector": [0.0, 1.0]}),
            )
            .await
            .unwrap();
        let hits = store.knn(&[1.0, 0.1], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc["title"], "a");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("similar:*", "similar:abc:10:0"));
        assert!(glob_match("user:*:read:*", "user:u1:read:a1"));
        assert!(!glob_match("user:*", "similar:abc"));
        assert!(glob_match("similar_lru", "similar_lru"));
        assert!(glob_match("similar:*:fallback", "similar:abc:fallback"));
        assert!(!glob_match("similar:*:fallback", "similar:abc:10:0"));
    }
}
