/// Per-article view metrics and trending
///
/// The total and daily counters are written synchronously with store-native
/// atomic increments — their return values are authoritative. Everything
/// else (unique viewer sets, engagement ring buffer, per-user history) is a
/// best-effort follow-up whose failures are logged and swallowed; those
/// counts may lag the authoritative counters under concurrent writers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::cache::keys;
use crate::errors::NewscoreError;
use crate::index::IndexGateway;
use crate::store::DataStore;

/// Engagement ring buffer bound per article.
const ENGAGEMENT_CAP: i64 = 1000;

/// Engagement entries retained for 7 days.
const ENGAGEMENT_TTL: Duration = Duration::from_secs(86_400 * 7);

/// Daily view counters roll off after 30 days.
const DAILY_TTL: Duration = Duration::from_secs(86_400 * 30);

/// How many recent engagement entries the metrics report groups over.
const ENGAGEMENT_REPORT_WINDOW: i64 = 50;

/// Request metadata captured on each view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One stored engagement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EngagementRecord {
    ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

/// Snapshot returned from record_view and the metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleMetrics {
    pub article_id: String,
    pub total_views: i64,
    pub unique_viewers: u64,
    pub user_viewers: u64,
    pub today_views: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_viewed: Option<DateTime<Utc>>,
}

/// Metrics report with engagement groupings over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    #[serde(flatten)]
    pub metrics: ArticleMetrics,
    pub views_by_hour: HashMap<String, u64>,
    pub views_by_referrer: HashMap<String, u64>,
    pub views_by_language: HashMap<String, u64>,
}

/// One entry of a user's view history, hydrated from the article store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub article_id: String,
    pub title: String,
    pub viewed_at: DateTime<Utc>,
    pub source: String,
}

/// A trending article decorated with its growth figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingArticle {
    pub article_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub today_views: i64,
    pub yesterday_views: i64,
    pub growth: f64,
}

fn date_str(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}-{:02}", ts.year(), ts.month(), ts.day())
}

fn hash_ip(ip: &str) -> String {
    hex::encode(Md5::digest(ip.as_bytes()))
}

pub struct MetricsTracker {
    store: Arc<dyn DataStore>,
    gateway: Arc<IndexGateway>,
}

impl MetricsTracker {
    pub fn new(store: Arc<dyn DataStore>, gateway: Arc<IndexGateway>) -> MetricsTracker {
        MetricsTracker { store, gateway }
    }

    /// Record one view. The monotonic counters are synchronous and
    /// authoritative; the remaining writes are best-effort.
    pub async fn record_view(
        &self,
        article_id: &str,
        user_id: Option<&str>,
        meta: &ViewMeta,
    ) -> Result<ArticleMetrics, NewscoreError> {
        let now = Utc::now();
        let today = date_str(now);

        let total_views = self.store.incr(&keys::views(article_id)).await?;
        let daily_key = keys::daily_views(article_id, &today);
        let today_views = self.store.hincr(&daily_key, "views", 1).await?;

        if let Err(e) = self
            .record_view_details(article_id, user_id, meta, now, &daily_key)
            .await
        {
            tracing::warn!(article_id, error = %e, "Best-effort view bookkeeping failed");
        }

        let unique_viewers = self
            .store
            .scard(&keys::unique_views(article_id))
            .await
            .unwrap_or(0);
        let user_viewers = self
            .store
            .scard(&keys::user_views(article_id))
            .await
            .unwrap_or(0);

        Ok(ArticleMetrics {
            article_id: article_id.to_string(),
            total_views,
            unique_viewers,
            user_viewers,
            today_views,
            last_viewed: Some(now),
        })
    }

    async fn record_view_details(
        &self,
        article_id: &str,
        user_id: Option<&str>,
        meta: &ViewMeta,
        now: DateTime<Utc>,
        daily_key: &str,
    ) -> Result<(), NewscoreError> {
        if let Some(ip) = &meta.ip {
            self.store
                .sadd(&keys::unique_views(article_id), &hash_ip(ip))
                .await?;
        }
        if let Some(uid) = user_id {
            self.store.sadd(&keys::user_views(article_id), uid).await?;
            self.store
                .hset(&keys::user_article_views(uid), article_id, &now.to_rfc3339())
                .await?;
        }

        let record = EngagementRecord {
            ts: now,
            ua: meta.user_agent.clone(),
            referrer: meta.referrer.clone(),
            lang: meta.language.clone(),
            user_id: user_id.map(String::from),
        };
        let engagement_key = keys::engagement(article_id);
        self.store
            .lpush_trim(
                &engagement_key,
                &serde_json::to_string(&record)?,
                ENGAGEMENT_CAP,
            )
            .await?;
        self.store.expire(&engagement_key, ENGAGEMENT_TTL).await?;
        self.store.expire(daily_key, DAILY_TTL).await?;
        self.store
            .set(&keys::last_viewed(article_id), &now.to_rfc3339(), None)
            .await?;
        Ok(())
    }

    /// Current counters plus groupings of the recent engagement entries by
    /// hour, referrer, and language.
    pub async fn metrics(&self, article_id: &str) -> Result<MetricsReport, NewscoreError> {
        let today = date_str(Utc::now());
        let total_views = self
            .store
            .get(&keys::views(article_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let today_views = self
            .store
            .hgetall(&keys::daily_views(article_id, &today))
            .await?
            .get("views")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let unique_viewers = self.store.scard(&keys::unique_views(article_id)).await?;
        let user_viewers = self.store.scard(&keys::user_views(article_id)).await?;
        let last_viewed = self
            .store
            .get(&keys::last_viewed(article_id))
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let raw = self
            .store
            .lrange(&keys::engagement(article_id), 0, ENGAGEMENT_REPORT_WINDOW - 1)
            .await?;
        let mut views_by_hour: HashMap<String, u64> = HashMap::new();
        let mut views_by_referrer: HashMap<String, u64> = HashMap::new();
        let mut views_by_language: HashMap<String, u64> = HashMap::new();
        for entry in raw {
            let Ok(record) = serde_json::from_str::<EngagementRecord>(&entry) else {
                continue;
            };
            *views_by_hour
                .entry(format!("{:02}", record.ts.hour()))
                .or_default() += 1;
            *views_by_referrer
                .entry(record.referrer.unwrap_or_else(|| "direct".to_string()))
                .or_default() += 1;
            *views_by_language
                .entry(record.lang.unwrap_or_else(|| "unknown".to_string()))
                .or_default() += 1;
        }

        Ok(MetricsReport {
            metrics: ArticleMetrics {
                article_id: article_id.to_string(),
                total_views,
                unique_viewers,
                user_viewers,
                today_views,
                last_viewed,
            },
            views_by_hour,
            views_by_referrer,
            views_by_language,
        })
    }

    /// The user's view history, hydrated and sorted by view time
    /// descending. Articles since deleted are skipped.
    pub async fn user_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, NewscoreError> {
        let raw = self
            .store
            .hgetall(&keys::user_article_views(user_id))
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (article_id, viewed_at) in raw {
            let Ok(viewed_at) = DateTime::parse_from_rfc3339(&viewed_at) else {
                continue;
            };
            let Some(article) = self.gateway.get_article(&article_id).await? else {
                continue;
            };
            entries.push(HistoryEntry {
                article_id,
                title: article.title,
                viewed_at: viewed_at.with_timezone(&Utc),
                source: article.source.name,
            });
        }
        entries.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        Ok(entries)
    }

    /// Articles trending today: every article with views today, decorated
    /// with growth over yesterday and ordered by today's views descending.
    /// `period_days` widens the "today" window for slower-moving feeds.
    pub async fn trending(
        &self,
        limit: usize,
        period_days: u32,
    ) -> Result<Vec<TrendingArticle>, NewscoreError> {
        let now = Utc::now();
        let period = period_days.max(1) as i64;

        let today = date_str(now);
        let today_keys = self
            .store
            .scan_match(&format!("article_daily_views:*:{}", today))
            .await?;

        let mut trending = Vec::new();
        for key in today_keys {
            let Some(article_id) = key
                .strip_prefix("article_daily_views:")
                .and_then(|rest| rest.strip_suffix(&format!(":{}", today)))
            else {
                continue;
            };

            let mut today_views = 0i64;
            let mut yesterday_views = 0i64;
            for d in 0..period {
                today_views += self.day_views(article_id, now - chrono::Duration::days(d)).await;
                yesterday_views += self
                    .day_views(article_id, now - chrono::Duration::days(period + d))
                    .await;
            }
            if today_views == 0 {
                continue;
            }
            let growth = (today_views - yesterday_views) as f64 / yesterday_views.max(1) as f64;
            trending.push(TrendingArticle {
                article_id: article_id.to_string(),
                title: None,
                today_views,
                yesterday_views,
                growth,
            });
        }

        trending.sort_by(|a, b| b.today_views.cmp(&a.today_views));
        trending.truncate(limit);

        for entry in trending.iter_mut() {
            if let Some(article) = self.gateway.get_article(&entry.article_id).await? {
                entry.title = Some(article.title);
            }
        }
        Ok(trending)
    }

    async fn day_views(&self, article_id: &str, day: DateTime<Utc>) -> i64 {
        self.store
            .hgetall(&keys::daily_views(article_id, &date_str(day)))
            .await
            .ok()
            .and_then(|h| h.get("views").and_then(|v| v.parse().ok()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Article;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    async fn tracker() -> (MetricsTracker, Arc<dyn DataStore>) {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(IndexGateway::new(Arc::clone(&store), 8));
        (MetricsTracker::new(Arc::clone(&store), gateway), store)
    }

    fn meta(ip: &str) -> ViewMeta {
        ViewMeta {
            ip: Some(ip.to_string()),
            user_agent: Some("test-agent".to_string()),
            referrer: Some("https://example.com".to_string()),
            language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn test_total_views_monotonic() {
        let (tracker, _) = tracker().await;
        let m1 = tracker.record_view("a1", None, &meta("1.1.1.1")).await.unwrap();
        let m2 = tracker.record_view("a1", None, &meta("1.1.1.1")).await.unwrap();
        assert_eq!(m1.total_views, 1);
        assert_eq!(m2.total_views, 2);
        assert_eq!(m2.today_views, 2);
    }

    #[tokio::test]
    async fn test_unique_viewers_by_hashed_ip() {
        let (tracker, store) = tracker().await;
        tracker.record_view("a1", None, &meta("1.1.1.1")).await.unwrap();
        tracker.record_view("a1", None, &meta("1.1.1.1")).await.unwrap();
        let m = tracker.record_view("a1", None, &meta("2.2.2.2")).await.unwrap();
        assert_eq!(m.unique_viewers, 2);
        // Raw IPs never land in the store
        assert!(!store
            .sismember(&keys::unique_views("a1"), "1.1.1.1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_user_views_and_history() {
        let (tracker, store) = tracker().await;
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let article = Article::new("History item", ts);
        let gateway = IndexGateway::new(Arc::clone(&store), 8);
        gateway.put_article(&article).await.unwrap();

        tracker
            .record_view(&article.id, Some("u1"), &meta("1.1.1.1"))
            .await
            .unwrap();
        let history = tracker.user_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title, "History item");
    }

    #[tokio::test]
    async fn test_metrics_report_groupings() {
        let (tracker, _) = tracker().await;
        tracker.record_view("a1", None, &meta("1.1.1.1")).await.unwrap();
        tracker.record_view("a1", None, &meta("2.2.2.2")).await.unwrap();
        let report = tracker.metrics("a1").await.unwrap();
        assert_eq!(report.metrics.total_views, 2);
        assert_eq!(
            report.views_by_referrer.get("https://example.com"),
            Some(&2)
        );
        assert_eq!(report.views_by_language.get("en"), Some(&2));
        assert!(report.metrics.last_viewed.is_some());
    }

    #[tokio::test]
    async fn test_trending_orders_by_today_views() {
        let (tracker, store) = tracker().await;
        let today = date_str(Utc::now());
        for (id, count) in [("a1", 10), ("a2", 5)] {
            for _ in 0..count {
                store
                    .hincr(&keys::daily_views(id, &today), "views", 1)
                    .await
                    .unwrap();
            }
        }
        // a3 has a key but zero views today
        store
            .hincr(&keys::daily_views("a3", &today), "views", 0)
            .await
            .unwrap();

        let trending = tracker.trending(2, 1).await.unwrap();
        assert_eq!(trending.len(), 2);
        assert_eq!(trending[0].article_id, "a1");
        assert_eq!(trending[1].article_id, "a2");
        assert_eq!(trending[0].today_views, 10);
        assert!(trending[0].growth >= 10.0 - 1e-9);
    }
}
