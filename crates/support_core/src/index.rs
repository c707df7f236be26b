use tracing::info;

use crate::embed::EmbeddingProvider;
use crate::error::{AgentError, Result};
use crate::kb::KnowledgeBase;

/// One embedding per KB question, stored in KB order.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    vectors: Vec<Vec<f32>>,
    dim: usize,
}

impl EmbeddingIndex {
    /// Encodes every KB question in a single batched call.
    ///
    /// Any backend failure is fatal: a matcher without an index cannot serve.
    pub fn build<E>(kb: &KnowledgeBase, embedder: &E) -> Result<Self>
    where
        E: EmbeddingProvider + ?Sized,
    {
        let questions = kb.questions();
        let vectors = embedder
            .embed_batch(&questions)
            .map_err(AgentError::EmbeddingUnavailable)?;

        if vectors.len() != questions.len() {
            return Err(AgentError::EmbeddingUnavailable(anyhow::anyhow!(
                "backend returned {} vectors for {} questions",
                vectors.len(),
                questions.len()
            )));
        }

        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            return Err(AgentError::EmbeddingUnavailable(anyhow::anyhow!(
                "backend returned empty vectors"
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(AgentError::EmbeddingDimension {
                expected: dim,
                actual: bad.len(),
            });
        }

        info!(entries = vectors.len(), dim, "built embedding index");
        Ok(Self { vectors, dim })
    }

    /// Encodes a query with the same backend the index was built with.
    pub fn encode_one<E>(&self, embedder: &E, text: &str) -> Result<Vec<f32>>
    where
        E: EmbeddingProvider + ?Sized,
    {
        let v = embedder
            .embed(text)
            .map_err(AgentError::EmbeddingUnavailable)?;
        if v.len() != self.dim {
            return Err(AgentError::EmbeddingDimension {
                expected: self.dim,
                actual: v.len(),
            });
        }
        Ok(v)
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn get(&self, idx: usize) -> Option<&[f32]> {
        self.vectors.get(idx).map(Vec::as_slice)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
