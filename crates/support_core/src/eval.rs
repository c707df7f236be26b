use crate::escalator::MatchEscalator;
use crate::model::Tier;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const DEFAULT_REQUIRED_PASS_RATE: f32 = 0.85;

/// A labelled question: which tier should answer it and, for hits, which KB
/// question it should resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    pub question: String,
    pub expected_tier: Tier,
    #[serde(default)]
    pub expected_question: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub case_id: String,
    pub passed: bool,
    pub actual_tier: Tier,
    pub actual_question: Option<String>,
    pub score: f32,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<EvalOutcome>,
}

impl EvalSummary {
    pub fn meets(&self, required_pass_rate: f32) -> bool {
        self.total > 0 && self.pass_rate >= required_pass_rate
    }
}

fn matches(case: &EvalCase, actual_tier: Tier, actual_question: Option<&str>) -> bool {
    if case.expected_tier != actual_tier {
        return false;
    }
    match case.expected_question.as_deref() {
        Some(expected) => actual_question == Some(expected),
        None => true,
    }
}

/// Runs every case through the cascade. A case whose query errors counts as
/// failed rather than aborting the run.
pub fn evaluate_cases(escalator: &MatchEscalator, cases: &[EvalCase]) -> EvalSummary {
    let kb = escalator.context().kb();
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let start = Instant::now();
        let result = escalator.resolve(&case.question);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outcome = match result {
            Ok(result) => {
                let actual_question = result
                    .entry
                    .and_then(|i| kb.get(i))
                    .map(|e| e.question.clone());
                EvalOutcome {
                    case_id: case.case_id.clone(),
                    passed: matches(case, result.source_tier, actual_question.as_deref()),
                    actual_tier: result.source_tier,
                    actual_question,
                    score: result.score,
                    latency_ms,
                    error: None,
                }
            }
            Err(err) => EvalOutcome {
                case_id: case.case_id.clone(),
                passed: false,
                actual_tier: Tier::None,
                actual_question: None,
                score: 0.0,
                latency_ms,
                error: Some(err.to_string()),
            },
        };
        outcomes.push(outcome);
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = total.saturating_sub(passed);
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f32 / total as f32
    };

    EvalSummary {
        total,
        passed,
        failed,
        pass_rate,
        outcomes,
    }
}
