pub mod bert;
pub mod classifier;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod escalator;
pub mod eval;
pub mod index;
pub mod kb;
pub mod minilm_embed;
pub mod model;
pub mod nli_classifier;
pub mod retrieval;
pub mod storage;

pub use classifier::{
    ClassifierAdapter, ClassifierError, ClassifierPick, LexicalClassifier, ZeroShotClassifier,
    DEFAULT_MAX_IN_FLIGHT,
};
pub use config::{
    AgentConfig, Thresholds, DEFAULT_CLASSIFIER_THRESHOLD, DEFAULT_EMBEDDING_THRESHOLD,
    DEFAULT_FALLBACK_MESSAGE, DEFAULT_KEYWORD_THRESHOLD,
};
pub use context::AgentContext;
pub use embed::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{AgentError, Result};
pub use escalator::MatchEscalator;
pub use eval::{evaluate_cases, EvalCase, EvalOutcome, EvalSummary, DEFAULT_REQUIRED_PASS_RATE};
pub use index::EmbeddingIndex;
pub use kb::KnowledgeBase;
pub use minilm_embed::MiniLmEmbeddingProvider;
pub use model::{KbEntry, LabelScore, MatchResult, Tier};
pub use nli_classifier::{NliZeroShotClassifier, DEFAULT_HYPOTHESIS_TEMPLATE};
pub use retrieval::{best, cosine_similarity, score};
pub use storage::{read_records, save_entries_jsonl};
