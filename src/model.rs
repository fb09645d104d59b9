/// Core entity types shared across the retrieval, personalization, and
/// metrics components.
///
/// Articles are immutable to this crate — the ingestion pipeline creates
/// them. Everything here is a plain serde value; ownership is linear from
/// producer to store, no in-process caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::NewscoreError;

/// Maximum keywords carried on an article (enforced upstream, re-checked here).
pub const MAX_KEYWORDS: usize = 15;

/// Maximum stored preferences per user.
pub const MAX_PREFERENCES: usize = 10;

/// Article sentiment as classified by the upstream summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Sentiment> {
        match s.to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// Publisher record. `name` doubles as a tag in the search index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A stored news article.
///
/// `id` is a content address: hex(sha256(title || published_at)), so
/// re-ingesting the same article is idempotent. `vector` length must equal
/// the configured index dimension once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source: Source,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_to_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compute the stable content address for an article.
pub fn article_id(title: &str, published_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(published_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

impl Article {
    /// Build a new article with a content-address id and fresh timestamps.
    pub fn new(title: impl Into<String>, published_at: DateTime<Utc>) -> Article {
        let title = title.into();
        let now = Utc::now();
        Article {
            id: article_id(&title, &published_at),
            title,
            description: String::new(),
            content: String::new(),
            summary: String::new(),
            sentiment: None,
            keywords: Vec::new(),
            source: Source::default(),
            published_at,
            url: String::new(),
            url_to_image: None,
            author: None,
            vector: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text used when embedding this article for similarity queries:
    /// stored keywords when present, otherwise the title.
    pub fn search_text(&self) -> String {
        if self.keywords.is_empty() {
            self.title.clone()
        } else {
            self.keywords.join(" ")
        }
    }
}

/// Per-user ordered preference list. Earlier entries carry more weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,
    pub preferences: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalize raw preference topics: trim, lowercase, dedup (order preserved),
/// cap at MAX_PREFERENCES. Returns a Validation error when nothing survives.
pub fn normalize_preferences(topics: &[String]) -> Result<Vec<String>, NewscoreError> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for topic in topics {
        let t = topic.trim().to_lowercase();
        if t.is_empty() {
            continue;
        }
        if seen.insert(t.clone()) {
            out.push(t);
        }
        if out.len() == MAX_PREFERENCES {
            break;
        }
    }
    if out.is_empty() {
        return Err(NewscoreError::validation(
            "topics",
            "At least one non-empty topic is required",
        ));
    }
    Ok(out)
}

/// Generate an anonymous user id: `user_{epoch_ms}_{9-char base36 random}`.
pub fn generate_user_id() -> String {
    use rand::Rng;
    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("user_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// How a result was retrieved. Mixed result sets (vector hits, fused
/// fallback hits, general top-ups) all carry one of these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Vector,
    Text,
    Semantic,
    Category,
    Temporal,
    Combined,
    General,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Text => "text",
            RetrievalMethod::Semantic => "semantic",
            RetrievalMethod::Category => "category",
            RetrievalMethod::Temporal => "temporal",
            RetrievalMethod::Combined => "combined",
            RetrievalMethod::General => "general",
        }
    }
}

/// An article decorated with a retrieval score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredArticle {
    #[serde(flatten)]
    pub article: Article,
    pub score: f64,
    pub method: RetrievalMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_preference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_order: Option<usize>,
}

/// Pagination envelope returned by every list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_count: u64,
    pub limit: usize,
    pub has_next: bool,
    pub has_prev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_page: Option<usize>,
    pub links: PageLinks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLinks {
    pub first: String,
    pub last: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total_count: u64) -> Pagination {
        let total_pages = if total_count == 0 {
            0
        } else {
            ((total_count as usize) + limit - 1) / limit
        };
        let has_next = total_pages > 0 && page < total_pages;
        let has_prev = page > 1;
        let link = |p: usize| format!("?page={}&limit={}", p, limit);
        Pagination {
            current_page: page,
            total_pages,
            total_count,
            limit,
            has_next,
            has_prev,
            next_page: has_next.then(|| page + 1),
            prev_page: has_prev.then(|| page - 1),
            links: PageLinks {
                first: link(1),
                last: link(total_pages.max(1)),
                next: has_next.then(|| link(page + 1)),
                prev: has_prev.then(|| link(page - 1)),
            },
        }
    }
}

/// A page of results plus its pagination envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Validate page/limit query inputs: page >= 1, 1 <= limit <= 100.
pub fn validate_paging(page: usize, limit: usize) -> Result<(), NewscoreError> {
    if page < 1 {
        return Err(NewscoreError::validation("page", "page must be >= 1"));
    }
    if limit < 1 || limit > 100 {
        return Err(NewscoreError::validation(
            "limit",
            "limit must be between 1 and 100",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_article_id_is_stable() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = article_id("T", &ts);
        let b = article_id("T", &ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_article_id_varies_with_title() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(article_id("T", &ts), article_id("U", &ts));
    }

    #[test]
    fn test_search_text_prefers_keywords() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut a = Article::new("Quantum chips arrive", ts);
        assert_eq!(a.search_text(), "Quantum chips arrive");
        a.keywords = vec!["ai".into(), "chip".into()];
        assert_eq!(a.search_text(), "ai chip");
    }

    #[test]
    fn test_normalize_preferences() {
        let topics = vec![
            "  Technology ".to_string(),
            "SPORTS".to_string(),
            "technology".to_string(),
            "".to_string(),
        ];
        let prefs = normalize_preferences(&topics).unwrap();
        assert_eq!(prefs, vec!["technology", "sports"]);
    }

    #[test]
    fn test_normalize_preferences_caps_at_ten() {
        let topics: Vec<String> = (0..15).map(|i| format!("topic{}", i)).collect();
        let prefs = normalize_preferences(&topics).unwrap();
        assert_eq!(prefs.len(), MAX_PREFERENCES);
    }

    #[test]
    fn test_normalize_preferences_rejects_empty() {
        let topics = vec!["   ".to_string(), "".to_string()];
        assert!(normalize_preferences(&topics).is_err());
    }

    #[test]
    fn test_generate_user_id_shape() {
        let id = generate_user_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "user");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_pagination_math() {
        let p = Pagination::new(2, 10, 35);
        assert_eq!(p.total_pages, 4);
        assert!(p.has_next);
        assert!(p.has_prev);
        assert_eq!(p.next_page, Some(3));
        assert_eq!(p.prev_page, Some(1));
        assert_eq!(p.links.last, "?page=4&limit=10");
    }

    #[test]
    fn test_pagination_empty() {
        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
        assert!(!p.has_prev);
        assert!(p.next_page.is_none());
    }

    #[test]
    fn test_validate_paging_bounds() {
        assert!(validate_paging(1, 10).is_ok());
        assert!(validate_paging(0, 10).is_err());
        assert!(validate_paging(1, 0).is_err());
        assert!(validate_paging(1, 101).is_err());
    }
}
