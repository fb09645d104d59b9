/// Local feature-hash embedding provider
///
/// Deterministic, dependency-free embedder for self-hosted deployments and
/// tests: token unigrams and bigrams are hashed into a fixed-dimension
/// bucket space with a sign bit, then L2-normalized. Not a semantic model —
/// texts sharing vocabulary land near each other, which is what the offline
/// similarity and personalization paths need.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

pub struct HashingEmbeddingProvider {
    dim: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dim: usize) -> HashingEmbeddingProvider {
        HashingEmbeddingProvider { dim }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();
        if tokens.is_empty() {
            return Err(EmbeddingError::Generation(
                "Cannot embed empty text".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dim];
        for token in &tokens {
            let (idx, sign) = self.bucket(token);
            vector[idx] += sign;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            let (idx, sign) = self.bucket(&bigram);
            vector[idx] += sign * 0.5;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "feature-hash-v1"
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let provider = HashingEmbeddingProvider::new(64);
        let a = provider.embed("ai chips in production").await.unwrap();
        let b = provider.embed("ai chips in production").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_embedding_is_normalized() {
        let provider = HashingEmbeddingProvider::new(64);
        let v = provider.embed("quantum computing breakthrough").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        use crate::store::cosine_similarity;
        let provider = HashingEmbeddingProvider::new(256);
        let a = provider.embed("ai chip hardware").await.unwrap();
        let b = provider.embed("ai chip factory").await.unwrap();
        let c = provider.embed("garden vegetables recipe").await.unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let provider = HashingEmbeddingProvider::new(64);
        assert!(provider.embed("   ").await.is_err());
    }
}
