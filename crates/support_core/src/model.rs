use serde::{Deserialize, Serialize};

/// One question/answer pair of the knowledge base.
///
/// Keywords are stored lower-cased; see [`crate::kb::KnowledgeBase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
}

/// The cascade stage that produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Keyword,
    Embedding,
    Classifier,
    None,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Keyword => "keyword",
            Tier::Embedding => "embedding",
            Tier::Classifier => "classifier",
            Tier::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub answer: Option<String>,
    pub source_tier: Tier,
    pub score: f32,
    /// Position of the matched entry in the knowledge base.
    pub entry: Option<usize>,
}

impl MatchResult {
    pub fn hit(tier: Tier, entry: usize, answer: &str, score: f32) -> Self {
        Self {
            answer: Some(answer.to_string()),
            source_tier: tier,
            score,
            entry: Some(entry),
        }
    }

    pub fn fallback() -> Self {
        Self {
            answer: None,
            source_tier: Tier::None,
            score: 0.0,
            entry: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.answer.is_some()
    }
}

/// A candidate label with its classifier score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}
