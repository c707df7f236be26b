use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::classifier::{ClassifierAdapter, ZeroShotClassifier};
use crate::embed::EmbeddingProvider;
use crate::error::Result;
use crate::index::EmbeddingIndex;
use crate::kb::KnowledgeBase;

/// Process-wide matching state, built once at startup and read-only after.
///
/// Concurrent queries share one context through an `Arc`; no locking is
/// needed because nothing here is mutated after `initialize`.
pub struct AgentContext {
    kb: KnowledgeBase,
    index: EmbeddingIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: ClassifierAdapter,
}

impl AgentContext {
    /// Fails if the embedding backend cannot encode the KB questions.
    pub fn initialize(
        kb: KnowledgeBase,
        embedder: Arc<dyn EmbeddingProvider>,
        classifier: Arc<dyn ZeroShotClassifier>,
        classifier_timeout: Duration,
    ) -> Result<Self> {
        let index = EmbeddingIndex::build(&kb, embedder.as_ref())?;
        let classifier = ClassifierAdapter::new(classifier, &kb, classifier_timeout);
        info!(entries = kb.len(), dim = index.dim(), "agent context ready");

        Ok(Self {
            kb,
            index,
            embedder,
            classifier,
        })
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn classifier(&self) -> &ClassifierAdapter {
        &self.classifier
    }

    pub fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        self.index.encode_one(self.embedder.as_ref(), text)
    }
}
