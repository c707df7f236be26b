use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::error::{AgentError, Result};
use crate::model::KbEntry;
use crate::storage::read_records;

const BUILTIN_FAQ: &str = include_str!("../data/faq.json");

/// The fixed question/answer table.
///
/// Entry order is significant: positions are shared with the embedding index
/// and with the classifier's label order, and never change after load.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<KbEntry>,
}

impl KnowledgeBase {
    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_FAQ)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: Vec<KbEntry> = serde_json::from_str(raw)
            .map_err(|e| AgentError::InvalidKnowledgeBase(format!("parse: {e}")))?;
        Self::from_entries(entries)
    }

    /// Loads a `.json` array or a `.jsonl` file.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_records::<KbEntry>(path).map_err(|e| match e {
            AgentError::Json(err) => {
                AgentError::InvalidKnowledgeBase(format!("{}: {err}", path.display()))
            }
            other => other,
        })?;
        let kb = Self::from_entries(entries)?;
        info!(path = %path.display(), entries = kb.len(), "loaded knowledge base");
        Ok(kb)
    }

    pub fn from_entries(entries: Vec<KbEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(AgentError::InvalidKnowledgeBase(
                "knowledge base has no entries".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            if entry.question.trim().is_empty() {
                return Err(AgentError::InvalidKnowledgeBase(format!(
                    "entry {idx}: blank question"
                )));
            }
            if entry.answer.trim().is_empty() {
                return Err(AgentError::InvalidKnowledgeBase(format!(
                    "entry {idx}: blank answer"
                )));
            }
            if !seen.insert(entry.question.clone()) {
                return Err(AgentError::InvalidKnowledgeBase(format!(
                    "entry {idx}: duplicate question {:?}",
                    entry.question
                )));
            }

            let mut keywords = Vec::with_capacity(entry.keywords.len());
            for kw in &entry.keywords {
                // Padding is kept, so " cam " does not match "became".
                let kw = kw.to_lowercase();
                // A blank keyword matches nearly every query.
                if kw.trim().is_empty() {
                    return Err(AgentError::InvalidKnowledgeBase(format!(
                        "entry {idx}: blank keyword"
                    )));
                }
                keywords.push(kw);
            }

            normalized.push(KbEntry {
                question: entry.question,
                answer: entry.answer,
                keywords,
            });
        }

        Ok(Self {
            entries: normalized,
        })
    }

    pub fn entries(&self) -> &[KbEntry] {
        &self.entries
    }

    pub fn get(&self, idx: usize) -> Option<&KbEntry> {
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KbEntry> {
        self.entries.iter()
    }

    /// Questions in KB order.
    pub fn questions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.question.clone()).collect()
    }

    /// Positions of every entry with at least one keyword occurring as a
    /// substring of `query_lower`, in KB order.
    pub fn keyword_candidates(&self, query_lower: &str) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.keywords.iter().any(|kw| query_lower.contains(kw.as_str())))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Exact question-string lookup.
    pub fn position_of_question(&self, question: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.question == question)
    }
}
