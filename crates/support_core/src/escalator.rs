use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::AgentConfig;
use crate::context::AgentContext;
use crate::error::Result;
use crate::model::{MatchResult, Tier};
use crate::retrieval;

/// Answers a question by escalating through keyword, embedding and
/// classifier matching, falling back to a fixed message.
///
/// Tiers run strictly in order and the first accepted tier wins; scores from
/// different tiers are never combined.
pub struct MatchEscalator {
    ctx: Arc<AgentContext>,
    config: AgentConfig,
}

impl MatchEscalator {
    pub fn new(ctx: Arc<AgentContext>, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { ctx, config })
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Total: always returns a non-empty answer, the fallback message, or the
    /// configured error notice if the query failed unexpectedly.
    pub fn ask(&self, text: &str) -> String {
        match self.resolve(text) {
            Ok(result) => self.render(&result),
            Err(err) => {
                error!(error = %err, "query failed");
                self.config.error_notice.clone()
            }
        }
    }

    /// The text a front end should show for `result`.
    pub fn render(&self, result: &MatchResult) -> String {
        result
            .answer
            .clone()
            .unwrap_or_else(|| self.config.fallback_message.clone())
    }

    /// Runs the cascade. Errors only when the embedding backend fails for this
    /// query; an unavailable classifier just ends in the fallback tier.
    pub fn resolve(&self, text: &str) -> Result<MatchResult> {
        let query = self.cap(text);
        if query.trim().is_empty() {
            debug!("empty query, using fallback");
            return Ok(MatchResult::fallback());
        }

        let kb = self.ctx.kb();
        let index = self.ctx.index();
        let thresholds = &self.config.thresholds;

        // Tier 1: keyword candidates, confirmed by similarity among themselves.
        let mut query_vec = None;
        let candidates = kb.keyword_candidates(&query.to_lowercase());
        if !candidates.is_empty() {
            let v = self.ctx.encode_query(query)?;
            let vectors: Vec<&[f32]> = candidates
                .iter()
                .map(|&i| index.vectors()[i].as_slice())
                .collect();

            if let Some((entry, score)) = retrieval::best(&v, &vectors, &candidates) {
                debug!(
                    tier = "keyword",
                    candidates = candidates.len(),
                    entry,
                    score,
                    "best keyword candidate"
                );
                if score >= thresholds.keyword {
                    return Ok(MatchResult::hit(
                        Tier::Keyword,
                        entry,
                        &kb.entries()[entry].answer,
                        score,
                    ));
                }
            }
            query_vec = Some(v);
        }

        // Tier 2: similarity over the whole KB, not just the non-keyword entries.
        let v = match query_vec {
            Some(v) => v,
            None => self.ctx.encode_query(query)?,
        };
        let ids: Vec<usize> = (0..index.len()).collect();
        if let Some((entry, score)) = retrieval::best(&v, index.vectors(), &ids) {
            debug!(tier = "embedding", entry, score, "best full-kb match");
            if score >= thresholds.embedding {
                return Ok(MatchResult::hit(
                    Tier::Embedding,
                    entry,
                    &kb.entries()[entry].answer,
                    score,
                ));
            }
        }

        // Tier 3: zero-shot classifier over every KB question.
        match self.ctx.classifier().top(query) {
            Ok(pick) if pick.score >= thresholds.classifier => {
                return Ok(MatchResult::hit(
                    Tier::Classifier,
                    pick.entry,
                    &kb.entries()[pick.entry].answer,
                    pick.score,
                ));
            }
            Ok(pick) => debug!(
                tier = "classifier",
                entry = pick.entry,
                score = pick.score,
                "below threshold"
            ),
            Err(err) => warn!(error = %err, "classifier tier skipped"),
        }

        Ok(MatchResult::fallback())
    }

    fn cap<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.config.max_query_chars) {
            Some((cut, _)) => {
                warn!(
                    chars = text.chars().count(),
                    max = self.config.max_query_chars,
                    "query truncated"
                );
                &text[..cut]
            }
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ZeroShotClassifier;
    use crate::embed::EmbeddingProvider;
    use crate::kb::KnowledgeBase;
    use crate::model::LabelScore;
    use crate::retrieval::cosine_similarity;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const DIM: usize = 6;
    const EVA: usize = 0;
    const AGENTS: usize = 3;
    const BENEFITS: usize = 4;

    /// Unit vector with the given weights and the remainder in the last axis.
    fn mix(weights: &[(usize, f32)]) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for &(i, w) in weights {
            v[i] = w;
        }
        let used: f32 = v.iter().map(|x| x * x).sum();
        v[DIM - 1] = (1.0 - used).max(0.0).sqrt();
        v
    }

    fn axis(i: usize) -> Vec<f32> {
        mix(&[(i, 1.0)])
    }

    fn spare() -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[DIM - 1] = 1.0;
        v
    }

    /// Maps known texts to fixed vectors; unknown texts land on the spare axis.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
        last: Mutex<String>,
    }

    impl TableEmbedder {
        fn new(kb: &KnowledgeBase, queries: &[(&str, Vec<f32>)]) -> Self {
            let mut table: HashMap<String, Vec<f32>> = kb
                .iter()
                .enumerate()
                .map(|(i, e)| (e.question.clone(), axis(i)))
                .collect();
            for (q, v) in queries {
                table.insert(q.to_string(), v.clone());
            }
            Self {
                table,
                calls: AtomicUsize::new(0),
                last: Mutex::new(String::new()),
            }
        }
    }

    impl EmbeddingProvider for TableEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = text.to_string();
            Ok(self.table.get(text).cloned().unwrap_or_else(spare))
        }
    }

    /// Gives `score` to one entry and spreads the rest evenly.
    struct Peaked {
        entry: usize,
        score: f32,
    }

    impl ZeroShotClassifier for Peaked {
        fn classify(&self, _text: &str, labels: &[String]) -> anyhow::Result<Vec<LabelScore>> {
            let rest = (1.0 - self.score) / (labels.len() - 1) as f32;
            let mut out: Vec<LabelScore> = labels
                .iter()
                .enumerate()
                .map(|(i, l)| LabelScore {
                    label: l.clone(),
                    score: if i == self.entry { self.score } else { rest },
                })
                .collect();
            out.sort_by(|a, b| b.score.total_cmp(&a.score));
            Ok(out)
        }
    }

    struct Offline;

    impl ZeroShotClassifier for Offline {
        fn classify(&self, _text: &str, _labels: &[String]) -> anyhow::Result<Vec<LabelScore>> {
            anyhow::bail!("connection refused")
        }
    }

    struct FlakyEmbedder {
        inner: TableEmbedder,
        fail_on: String,
    }

    impl EmbeddingProvider for FlakyEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if text == self.fail_on {
                anyhow::bail!("embedding backend crashed");
            }
            self.inner.embed(text)
        }
    }

    fn escalator_with(
        embedder: Arc<dyn EmbeddingProvider>,
        classifier: Arc<dyn ZeroShotClassifier>,
        config: AgentConfig,
    ) -> MatchEscalator {
        let kb = KnowledgeBase::builtin().unwrap();
        let ctx = AgentContext::initialize(kb, embedder, classifier, Duration::ZERO).unwrap();
        MatchEscalator::new(Arc::new(ctx), config).unwrap()
    }

    fn low_classifier() -> Arc<dyn ZeroShotClassifier> {
        Arc::new(Peaked {
            entry: 1,
            score: 0.3,
        })
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::builtin().unwrap()
    }

    #[test]
    fn what_is_eva_answers_from_keyword_tier() {
        let kb = kb();
        let embedder = TableEmbedder::new(&kb, &[("What is EVA?", mix(&[(EVA, 0.9)]))]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let result = esc.resolve("What is EVA?").unwrap();
        assert_eq!(result.source_tier, Tier::Keyword);
        assert_eq!(result.entry, Some(EVA));
        assert_eq!(result.answer.as_deref(), Some(kb.get(EVA).unwrap().answer.as_str()));
        assert_eq!(esc.ask("What is EVA?"), kb.get(EVA).unwrap().answer);
    }

    #[test]
    fn keyword_match_beats_stronger_unmatched_entry() {
        let kb = kb();
        // Only "eva" matches, yet the query is far closer to the benefits entry.
        let q = "does eva save money";
        let embedder = TableEmbedder::new(&kb, &[(q, mix(&[(EVA, 0.61), (BENEFITS, 0.79)]))]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let result = esc.resolve(q).unwrap();
        assert_eq!(result.source_tier, Tier::Keyword);
        assert_eq!(result.entry, Some(EVA));
        assert!((result.score - 0.61).abs() < 1e-4);
    }

    #[test]
    fn best_of_several_keyword_candidates_wins() {
        let kb = kb();
        let q = "what are the benefits of thoughtful ai agents";
        // EVA is the closest entry overall but no EVA keyword is in the query.
        let embedder = TableEmbedder::new(
            &kb,
            &[(q, mix(&[(EVA, 0.7), (AGENTS, 0.2), (BENEFITS, 0.65)]))],
        );
        assert_eq!(kb.keyword_candidates(q), vec![AGENTS, BENEFITS]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let result = esc.resolve(q).unwrap();
        assert_eq!(result.source_tier, Tier::Keyword);
        assert_eq!(result.entry, Some(BENEFITS));
        assert!((result.score - 0.65).abs() < 1e-4);
    }

    #[test]
    fn rejected_keyword_candidates_escalate_to_full_kb() {
        let kb = kb();
        let q = "how do your agents cut down on paperwork";
        let embedder = Arc::new(TableEmbedder::new(
            &kb,
            &[(q, mix(&[(AGENTS, 0.3), (BENEFITS, 0.8)]))],
        ));
        let esc = escalator_with(embedder.clone(), low_classifier(), AgentConfig::default());
        assert_eq!(kb.keyword_candidates(q), vec![AGENTS]);

        let before = embedder.calls.load(Ordering::SeqCst);
        let result = esc.resolve(q).unwrap();

        assert_eq!(result.source_tier, Tier::Embedding);
        assert_eq!(result.entry, Some(BENEFITS));
        assert_eq!(result.answer.as_deref(), Some(kb.get(BENEFITS).unwrap().answer.as_str()));
        // The tier-1 vector is reused by tier 2.
        assert_eq!(embedder.calls.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn full_kb_can_pick_a_keyword_entry_after_rejection() {
        let kb = kb();
        let q = "eva";
        // Between the two thresholds: rejected by tier 1 only if below 0.60.
        let embedder = TableEmbedder::new(&kb, &[(q, mix(&[(EVA, 0.55), (AGENTS, 0.7)]))]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let result = esc.resolve(q).unwrap();
        assert_eq!(result.source_tier, Tier::Embedding);
        assert_eq!(result.entry, Some(AGENTS));
    }

    #[test]
    fn embedding_threshold_is_inclusive() {
        let kb = kb();
        let q = "tell me something about automation";
        let v = mix(&[(BENEFITS, 0.65)]);
        let exact = cosine_similarity(&v, &axis(BENEFITS));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TableEmbedder::new(&kb, &[(q, v)]));

        let mut config = AgentConfig::default();
        config.thresholds.embedding = exact;
        let esc = escalator_with(embedder.clone(), low_classifier(), config.clone());
        assert_eq!(esc.resolve(q).unwrap().source_tier, Tier::Embedding);

        config.thresholds.embedding = f32::from_bits(exact.to_bits() + 1);
        let esc = escalator_with(embedder, low_classifier(), config);
        assert_eq!(esc.resolve(q).unwrap().source_tier, Tier::None);
    }

    #[test]
    fn just_below_default_embedding_threshold_is_rejected() {
        let kb = kb();
        let q = "tell me something about automation";
        let embedder = TableEmbedder::new(&kb, &[(q, mix(&[(BENEFITS, 0.6499)]))]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let result = esc.resolve(q).unwrap();
        assert_eq!(result.source_tier, Tier::None);
        assert_eq!(result.answer, None);
    }

    #[test]
    fn classifier_tier_answers_when_embeddings_are_weak() {
        let kb = kb();
        let classifier = Arc::new(Peaked {
            entry: 2,
            score: 0.8,
        });
        let esc = escalator_with(
            Arc::new(TableEmbedder::new(&kb, &[])),
            classifier,
            AgentConfig::default(),
        );

        let result = esc.resolve("how do payments land in accounts").unwrap();
        assert_eq!(result.source_tier, Tier::Classifier);
        assert_eq!(result.entry, Some(2));
        assert!((result.score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn weather_question_falls_back() {
        let kb = kb();
        let esc = escalator_with(
            Arc::new(TableEmbedder::new(&kb, &[])),
            low_classifier(),
            AgentConfig::default(),
        );

        let result = esc.resolve("what's the weather today").unwrap();
        assert_eq!(result.source_tier, Tier::None);
        assert_eq!(esc.ask("what's the weather today"), esc.config().fallback_message);
    }

    #[test]
    fn unavailable_classifier_is_not_an_error() {
        let kb = kb();
        let esc = escalator_with(
            Arc::new(TableEmbedder::new(&kb, &[])),
            Arc::new(Offline),
            AgentConfig::default(),
        );

        let result = esc.resolve("zebra quantum pancake").unwrap();
        assert_eq!(result, MatchResult::fallback());
        assert_eq!(esc.ask("zebra quantum pancake"), esc.config().fallback_message);
    }

    #[test]
    fn ask_is_total() {
        let kb = kb();
        let esc = escalator_with(
            Arc::new(TableEmbedder::new(&kb, &[])),
            low_classifier(),
            AgentConfig::default(),
        );

        for input in ["", "   ", "\n", "?!", "日本語の質問", "eva eva eva"] {
            assert!(!esc.ask(input).is_empty(), "empty answer for {input:?}");
        }
    }

    #[test]
    fn blank_queries_skip_every_model() {
        let kb = kb();
        let embedder = Arc::new(TableEmbedder::new(&kb, &[]));
        let esc = escalator_with(
            embedder.clone(),
            Arc::new(Peaked {
                entry: 1,
                score: 0.99,
            }),
            AgentConfig::default(),
        );
        let before = embedder.calls.load(Ordering::SeqCst);

        for input in ["", "   ", "\t\n"] {
            assert_eq!(esc.resolve(input).unwrap(), MatchResult::fallback());
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn query_time_embedding_failure_becomes_error_notice() {
        let kb = kb();
        let embedder = FlakyEmbedder {
            inner: TableEmbedder::new(&kb, &[]),
            fail_on: "what is cam".to_string(),
        };
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        assert!(esc.resolve("what is cam").is_err());
        assert_eq!(esc.ask("what is cam"), esc.config().error_notice);
    }

    #[test]
    fn repeated_queries_are_deterministic() {
        let kb = kb();
        let q = "how do your agents cut down on paperwork";
        let embedder = TableEmbedder::new(&kb, &[(q, mix(&[(AGENTS, 0.3), (BENEFITS, 0.8)]))]);
        let esc = escalator_with(Arc::new(embedder), low_classifier(), AgentConfig::default());

        let first = esc.resolve(q).unwrap();
        for _ in 0..5 {
            assert_eq!(esc.resolve(q).unwrap(), first);
        }
    }

    #[test]
    fn long_queries_are_capped_before_embedding() {
        let kb = kb();
        let embedder = Arc::new(TableEmbedder::new(&kb, &[]));
        let config = AgentConfig {
            max_query_chars: 8,
            ..AgentConfig::default()
        };
        let esc = escalator_with(embedder.clone(), low_classifier(), config);

        esc.resolve("ééééééééééééééé and more").unwrap();
        assert_eq!(*embedder.last.lock().unwrap(), "éééééééé");
    }

    #[test]
    fn concurrent_queries_share_one_context() {
        let kb = kb();
        let embedder = TableEmbedder::new(&kb, &[("What is EVA?", mix(&[(EVA, 0.9)]))]);
        let esc = Arc::new(escalator_with(
            Arc::new(embedder),
            low_classifier(),
            AgentConfig::default(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let esc = Arc::clone(&esc);
                std::thread::spawn(move || esc.resolve("What is EVA?").unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().entry, Some(EVA));
        }
    }
}
