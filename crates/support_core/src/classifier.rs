use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::kb::KnowledgeBase;
use crate::model::LabelScore;

/// Inferences allowed to run at once on worker threads, counting ones the
/// caller already gave up on.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Zero-shot classification capability.
///
/// Returns one score per candidate label. Implementations must be safe for
/// concurrent read-only inference.
pub trait ZeroShotClassifier: Send + Sync {
    fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> anyhow::Result<Vec<LabelScore>>;
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0:#}")]
    Unavailable(anyhow::Error),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier busy: {0} inferences already running")]
    Busy(usize),

    #[error("classifier returned malformed output: {0}")]
    MalformedOutput(String),
}

/// The classifier's top label, resolved back to a KB position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierPick {
    pub entry: usize,
    pub label: String,
    pub score: f32,
}

/// Shapes classifier calls around the knowledge base: every KB question is a
/// candidate label, in KB order, and the winning label maps back to its entry
/// by exact string equality.
pub struct ClassifierAdapter {
    classifier: Arc<dyn ZeroShotClassifier>,
    labels: Arc<Vec<String>>,
    timeout: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

/// Holds one in-flight slot until the worker finishes, timed out or not.
struct InFlightSlot(Arc<AtomicUsize>);

impl InFlightSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ClassifierAdapter {
    /// A zero `timeout` waits indefinitely.
    pub fn new(
        classifier: Arc<dyn ZeroShotClassifier>,
        kb: &KnowledgeBase,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            labels: Arc::new(kb.questions()),
            timeout: (!timeout.is_zero()).then_some(timeout),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Caps worker-thread inferences. Calls beyond the cap fail with
    /// [`ClassifierError::Busy`] without starting a thread.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Worker-thread inferences still running, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// All labels, best first.
    pub fn rank(&self, text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let mut ranked = self.invoke(text)?;
        self.check(&ranked)?;
        // Stable, so equal scores keep the backend's order.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }

    pub fn top(&self, text: &str) -> Result<ClassifierPick, ClassifierError> {
        let top = self
            .rank(text)?
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::MalformedOutput("no labels returned".to_string()))?;
        let entry = self
            .labels
            .iter()
            .position(|l| *l == top.label)
            .ok_or_else(|| {
                ClassifierError::MalformedOutput(format!("unknown label {:?}", top.label))
            })?;

        debug!(entry, score = top.score, "classifier top label");
        Ok(ClassifierPick {
            entry,
            label: top.label,
            score: top.score,
        })
    }

    fn invoke(&self, text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let Some(timeout) = self.timeout else {
            return self
                .classifier
                .classify(text, &self.labels)
                .map_err(ClassifierError::Unavailable);
        };

        let Some(slot) = InFlightSlot::acquire(&self.in_flight, self.max_in_flight) else {
            debug!(max = self.max_in_flight, "classifier saturated");
            return Err(ClassifierError::Busy(self.max_in_flight));
        };

        let (tx, rx) = mpsc::channel();
        let classifier = Arc::clone(&self.classifier);
        let labels = Arc::clone(&self.labels);
        let text = text.to_string();
        thread::Builder::new()
            .name("zero-shot".to_string())
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone once the caller has timed out.
                let _ = tx.send(classifier.classify(&text, &labels));
            })
            .map_err(|e| ClassifierError::Unavailable(e.into()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(ClassifierError::Unavailable),
            Err(RecvTimeoutError::Timeout) => Err(ClassifierError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ClassifierError::Unavailable(
                anyhow::anyhow!("classifier worker exited without a result"),
            )),
        }
    }

    fn check(&self, ranked: &[LabelScore]) -> Result<(), ClassifierError> {
        if ranked.len() != self.labels.len() {
            return Err(ClassifierError::MalformedOutput(format!(
                "{} scores for {} labels",
                ranked.len(),
                self.labels.len()
            )));
        }
        if let Some(bad) = ranked
            .iter()
            .find(|s| !s.score.is_finite() || !(0.0..=1.0).contains(&s.score))
        {
            return Err(ClassifierError::MalformedOutput(format!(
                "score {} for {:?} outside [0, 1]",
                bad.score, bad.label
            )));
        }
        Ok(())
    }
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Word-overlap classifier. Needs no model files.
///
/// Each label gets the Jaccard overlap between its words and the text's
/// words; the overlaps are turned into a distribution with a tempered
/// softmax, as a single-label zero-shot pipeline would.
#[derive(Debug, Clone)]
pub struct LexicalClassifier {
    temperature: f32,
}

impl LexicalClassifier {
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature: temperature.max(1e-3),
        }
    }
}

impl Default for LexicalClassifier {
    fn default() -> Self {
        Self { temperature: 0.1 }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

impl ZeroShotClassifier for LexicalClassifier {
    fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> anyhow::Result<Vec<LabelScore>> {
        let query = words(text);
        let overlaps: Vec<f32> = candidate_labels
            .iter()
            .map(|label| {
                let label = words(label);
                let union = query.union(&label).count();
                if union == 0 {
                    0.0
                } else {
                    query.intersection(&label).count() as f32 / union as f32
                }
            })
            .map(|o| o / self.temperature)
            .collect();

        let mut scored: Vec<LabelScore> = candidate_labels
            .iter()
            .zip(softmax(&overlaps))
            .map(|(label, score)| LabelScore {
                label: label.clone(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }
}
