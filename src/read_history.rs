/// Per-user read history
///
/// Records "already viewed" article ids with a rolling TTL so the read set
/// stays bounded, and supports bulk filtering of candidate lists. Each view
/// writes a per-article string key (for point lookups with per-entry TTL)
/// plus a scored-set entry ordered by view time (for bulk enumeration).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::keys;
use crate::errors::NewscoreError;
use crate::model::ScoredArticle;
use crate::store::DataStore;

pub struct ReadHistory {
    store: Arc<dyn DataStore>,
    ttl: Duration,
}

impl ReadHistory {
    pub fn new(store: Arc<dyn DataStore>, ttl_secs: u64) -> ReadHistory {
        ReadHistory {
            store,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Record that `user_id` has viewed `article_id`. Marking the same
    /// article twice refreshes the timestamp and leaves the set otherwise
    /// unchanged.
    pub async fn mark_read(&self, user_id: &str, article_id: &str) -> Result<(), NewscoreError> {
        let now = Utc::now();
        self.store
            .set(
                &keys::read(user_id, article_id),
                &now.to_rfc3339(),
                Some(self.ttl),
            )
            .await?;
        let set_key = keys::read_set(user_id);
        self.store
            .zadd(&set_key, now.timestamp_millis() as f64, article_id)
            .await?;
        self.store.expire(&set_key, self.ttl).await?;
        Ok(())
    }

    /// All article ids the user has viewed recently, oldest first.
    pub async fn list_read(&self, user_id: &str) -> Result<Vec<String>, NewscoreError> {
        self.store
            .zrange(&keys::read_set(user_id), 0, -1, false)
            .await
    }

    async fn read_set(&self, user_id: &str) -> Result<HashSet<String>, NewscoreError> {
        Ok(self.list_read(user_id).await?.into_iter().collect())
    }

    /// Remove already-read articles from a candidate list, preserving
    /// order. Returns the survivors and the number removed.
    pub async fn filter(
        &self,
        user_id: &str,
        candidates: Vec<ScoredArticle>,
    ) -> Result<(Vec<ScoredArticle>, usize), NewscoreError> {
        let read = self.read_set(user_id).await?;
        if read.is_empty() {
            return Ok((candidates, 0));
        }
        let before = candidates.len();
        let kept: Vec<ScoredArticle> = candidates
            .into_iter()
            .filter(|c| !read.contains(&c.article.id))
            .collect();
        let removed = before - kept.len();
        Ok((kept, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, RetrievalMethod};
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn history() -> ReadHistory {
        ReadHistory::new(Arc::new(MemoryStore::new()), 7200)
    }

    fn scored(title: &str) -> ScoredArticle {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ScoredArticle {
            article: Article::new(title, ts),
            score: 1.0,
            method: RetrievalMethod::General,
            similarity: None,
            matched_preference: None,
            preference_order: None,
        }
    }

    #[tokio::test]
    async fn test_mark_and_list() {
        let h = history();
        h.mark_read("u1", "a1").await.unwrap();
        h.mark_read("u1", "a2").await.unwrap();
        let read = h.list_read("u1").await.unwrap();
        assert_eq!(read, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let h = history();
        h.mark_read("u1", "a1").await.unwrap();
        h.mark_read("u1", "a1").await.unwrap();
        assert_eq!(h.list_read("u1").await.unwrap(), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_filter_preserves_order() {
        let h = history();
        let a = scored("first");
        let b = scored("second");
        let c = scored("third");
        h.mark_read("u1", &b.article.id).await.unwrap();

        let (kept, removed) = h
            .filter("u1", vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].article.id, a.article.id);
        assert_eq!(kept[1].article.id, c.article.id);
    }

    #[tokio::test]
    async fn test_filter_with_no_history_is_identity() {
        let h = history();
        let items = vec![scored("one"), scored("two")];
        let (kept, removed) = h.filter("fresh-user", items.clone()).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), items.len());
    }
}
