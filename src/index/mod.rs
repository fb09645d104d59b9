/// IndexGateway — typed access to the article document store and the
/// combined full-text + tag + vector index.
///
/// Every other component goes through this wrapper; the structured query
/// model plus per-backend compilation keeps query-language quirks out of
/// the engines. Transport failures surface as IndexUnavailable and callers
/// decide the fallback.

use std::sync::Arc;

use crate::cache::keys;
use crate::errors::NewscoreError;
use crate::model::Article;
use crate::store::{
    DataStore, IndexSchema, QueryNode, RawKnnHit, SearchOptions, TagField,
};

/// One page of articles from a text search, plus the total match count.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub articles: Vec<Article>,
    pub total: u64,
}

/// One KNN result: the article and its cosine similarity to the query
/// vector (similarity = 1 - distance).
#[derive(Debug, Clone)]
pub struct KnnHit {
    pub article: Article,
    pub similarity: f64,
}

pub struct IndexGateway {
    store: Arc<dyn DataStore>,
    schema: IndexSchema,
}

impl IndexGateway {
    pub fn new(store: Arc<dyn DataStore>, dimension: usize) -> IndexGateway {
        IndexGateway {
            store,
            schema: IndexSchema::articles(dimension),
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// The vector dimension the index is pinned to.
    pub fn dimension(&self) -> usize {
        self.schema.dimension
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>, NewscoreError> {
        let Some(doc) = self.store.get_json(&keys::article(id)).await? else {
            return Ok(None);
        };
        let article: Article = serde_json::from_value(doc)?;
        Ok(Some(article))
    }

    /// Store an article document. Idempotent on id. Rejects vectors whose
    /// length differs from the index dimension — dimension is configuration,
    /// never coerced.
    pub async fn put_article(&self, article: &Article) -> Result<(), NewscoreError> {
        if let Some(vector) = &article.vector {
            if vector.len() != self.schema.dimension {
                return Err(NewscoreError::validation(
                    "vector",
                    &format!(
                        "vector length {} does not match index dimension {}",
                        vector.len(),
                        self.schema.dimension
                    ),
                ));
            }
        }
        let doc = serde_json::to_value(article)?;
        self.store.put_json(&keys::article(&article.id), &doc).await
    }

    pub async fn exists(&self, id: &str) -> Result<bool, NewscoreError> {
        self.store.exists(&keys::article(id)).await
    }

    pub async fn text_search(
        &self,
        query: &QueryNode,
        opts: &SearchOptions,
    ) -> Result<SearchPage, NewscoreError> {
        let page = self.store.search(query, opts).await?;
        let articles = page
            .docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect();
        Ok(SearchPage {
            articles,
            total: page.total,
        })
    }

    /// Vector KNN search. Requests 2k candidates from the store so callers
    /// can threshold by similarity without starving the page, and drops
    /// `exclude_id` (a similar-articles query must never return its own
    /// target).
    pub async fn vector_knn(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryNode>,
        exclude_id: Option<&str>,
    ) -> Result<Vec<KnnHit>, NewscoreError> {
        let raw = self.store.knn(vector, k * 2, filter).await?;
        let hits = raw
            .into_iter()
            .filter_map(|RawKnnHit { doc, distance }| {
                let article: Article = serde_json::from_value(doc).ok()?;
                if exclude_id.map(|id| id == article.id).unwrap_or(false) {
                    return None;
                }
                Some(KnnHit {
                    article,
                    similarity: 1.0 - distance,
                })
            })
            .take(k)
            .collect();
        Ok(hits)
    }

    /// Distinct source names, for the sources metadata endpoint.
    pub async fn list_sources(&self) -> Result<Vec<String>, NewscoreError> {
        self.store.tag_values(TagField::SourceName).await
    }

    /// Drop every index, then create the composite article index from the
    /// schema. Run once at startup; a pre-existing index is acceptable and
    /// a failed drop is not fatal.
    pub async fn recreate_index(&self) -> Result<(), NewscoreError> {
        if let Err(e) = self.store.drop_all_indexes().await {
            tracing::warn!(error = %e, "Dropping search indexes failed, creating over existing state");
        }
        self.store.ensure_index(&self.schema).await
    }
}
