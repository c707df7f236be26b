use std::io::{self, Write};

use serde::Serialize;
use support_core::{EvalSummary, MatchEscalator, Tier};
use tracing::error;

use crate::cli::Format;

/// What the front end shows for one question.
#[derive(Debug, Serialize)]
pub struct Reply<'a> {
    pub question: &'a str,
    pub answer: String,
    pub source_tier: Tier,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs one question through the cascade. Query failures become the
/// configured error notice, never a process error.
pub fn reply<'a>(escalator: &MatchEscalator, question: &'a str) -> Reply<'a> {
    match escalator.resolve(question) {
        Ok(result) => Reply {
            question,
            answer: escalator.render(&result),
            source_tier: result.source_tier,
            score: result.score,
            entry: result.entry,
            error: None,
        },
        Err(err) => {
            error!(error = %err, "query failed");
            Reply {
                question,
                answer: escalator.config().error_notice.clone(),
                source_tier: Tier::None,
                score: 0.0,
                entry: None,
                error: Some(err.to_string()),
            }
        }
    }
}

pub fn print_reply(out: &mut impl Write, format: Format, reply: &Reply<'_>) -> io::Result<()> {
    match format {
        Format::Text => writeln!(out, "Agent: {}", reply.answer),
        Format::Json => {
            serde_json::to_writer(&mut *out, reply)?;
            writeln!(out)
        }
    }
}

pub fn print_eval(
    out: &mut impl Write,
    format: Format,
    run_id: &str,
    model: &str,
    summary: &EvalSummary,
    required: f32,
) -> io::Result<()> {
    if format == Format::Json {
        #[derive(Serialize)]
        struct JsonEval<'a> {
            run_id: &'a str,
            model: &'a str,
            required_pass_rate: f32,
            meets_threshold: bool,
            #[serde(flatten)]
            summary: &'a EvalSummary,
        }

        serde_json::to_writer_pretty(
            &mut *out,
            &JsonEval {
                run_id,
                model,
                required_pass_rate: required,
                meets_threshold: summary.meets(required),
                summary,
            },
        )?;
        return writeln!(out);
    }

    writeln!(
        out,
        "run_id={} model={} total={} passed={} failed={} pass_rate={:.4} required={:.4} meets_threshold={}",
        run_id,
        model,
        summary.total,
        summary.passed,
        summary.failed,
        summary.pass_rate,
        required,
        summary.meets(required)
    )?;

    for o in &summary.outcomes {
        writeln!(
            out,
            "case={} passed={} tier={} question={} score={:.4} latency={:.1}ms{}",
            o.case_id,
            o.passed,
            o.actual_tier.as_str(),
            o.actual_question.as_deref().unwrap_or("null"),
            o.score,
            o.latency_ms,
            o.error
                .as_deref()
                .map(|e| format!(" error={e}"))
                .unwrap_or_default()
        )?;
    }

    let total_ms: f64 = summary.outcomes.iter().map(|o| o.latency_ms).sum();
    let avg_ms = total_ms / summary.outcomes.len().max(1) as f64;
    writeln!(out, "total_latency={total_ms:.1}ms avg_latency={avg_ms:.1}ms")
}
