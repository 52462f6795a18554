//! Embedding providers for semantic memory.
//!
//! [`Embedder`] is the seam where a real embedding endpoint plugs in. The
//! crate ships [`HashEmbedder`], a deterministic local implementation that
//! hashes tokens into a fixed-width bucket vector: hermetic for tests and
//! development, and good enough for coarse similarity since overlapping
//! vocabulary lands in overlapping buckets.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while producing an embedding.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbedderError {
    #[error("embedding provider error: {message}")]
    #[diagnostic(code(taskloom::memory::embedder))]
    Provider { message: String },

    #[error("cannot embed empty content")]
    #[diagnostic(
        code(taskloom::memory::empty_content),
        help("Skip storing records with no content instead of embedding them.")
    )]
    EmptyContent,
}

/// Produces fixed-length embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Width of the vectors this embedder produces.
    fn dimensions(&self) -> usize;

    /// Embed one piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

/// Deterministic token-hash embedder.
///
/// Tokens are lowercased alphanumeric runs; each token increments one
/// bucket selected by an FNV-1a hash, and the result is L2-normalized so
/// cosine similarity behaves sensibly.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a; stable across runs, unlike the std RandomState hasher.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.trim().is_empty() {
            return Err(EmbedderError::EmptyContent);
        }
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            vector[self.bucket(&token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("workflow engine checkpoints").await.unwrap();
        let b = embedder.embed("workflow engine checkpoints").await.unwrap();
        assert_eq!(a, b);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_vocabulary_is_more_similar() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed("budget ledger spend tracking").await.unwrap();
        let near = embedder.embed("ledger tracking of budget spend").await.unwrap();
        let far = embedder.embed("penguin habitats in antarctica").await.unwrap();
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(a, b)| a * b).sum::<f32>();
        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let embedder = HashEmbedder::default();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbedderError::EmptyContent)
        ));
    }
}
