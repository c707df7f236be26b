mod cli;
mod output;

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use support_core::{
    evaluate_cases, read_records, save_entries_jsonl, AgentConfig, AgentContext, EmbeddingProvider,
    EvalCase, HashEmbeddingProvider, KnowledgeBase, LexicalClassifier, MatchEscalator,
    MiniLmEmbeddingProvider, NliZeroShotClassifier, ZeroShotClassifier,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::output::{print_eval, print_reply, reply};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(timeout) = cli.classifier_timeout {
        config.classifier_timeout = timeout.into();
    }
    config.validate()?;
    Ok(config)
}

fn load_kb(cli: &Cli) -> Result<KnowledgeBase> {
    match &cli.kb {
        Some(path) => KnowledgeBase::load(path)
            .with_context(|| format!("load knowledge base {}", path.display())),
        None => KnowledgeBase::builtin().context("load built-in knowledge base"),
    }
}

fn model_name(path: Option<&Path>, fallback: &str) -> String {
    path.map(|p| {
        p.file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| p.display().to_string())
    })
    .unwrap_or_else(|| fallback.to_string())
}

fn make_embedder(cli: &Cli) -> Result<Arc<dyn EmbeddingProvider>> {
    match (&cli.model_path, &cli.tokenizer_path) {
        (Some(model), Some(tokenizer)) => {
            info!(model = %model.display(), "loading sentence embedder");
            let provider = MiniLmEmbeddingProvider::load(model, tokenizer)
                .with_context(|| format!("load embedding model {}", model.display()))?;
            Ok(Arc::new(provider))
        }
        (None, None) => Ok(Arc::new(HashEmbeddingProvider::default())),
        _ => anyhow::bail!("--model-path and --tokenizer-path must both be provided"),
    }
}

fn make_classifier(cli: &Cli, config: &AgentConfig) -> Result<Arc<dyn ZeroShotClassifier>> {
    match &cli.classifier_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "loading zero-shot classifier");
            let classifier = NliZeroShotClassifier::load(dir, &config.hypothesis_template)
                .with_context(|| format!("load classifier from {}", dir.display()))?;
            Ok(Arc::new(classifier))
        }
        None => Ok(Arc::new(LexicalClassifier::default())),
    }
}

fn build_escalator(cli: &Cli) -> Result<MatchEscalator> {
    let config = load_config(cli)?;
    let kb = load_kb(cli)?;
    let embedder = make_embedder(cli)?;
    let classifier = make_classifier(cli, &config)?;

    let ctx = AgentContext::initialize(kb, embedder, classifier, config.classifier_timeout)
        .context("initialize agent")?;
    Ok(MatchEscalator::new(Arc::new(ctx), config)?)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.validate().map_err(anyhow::Error::msg)?;
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Ask { question } => {
            let escalator = build_escalator(&cli)?;
            print_reply(&mut stdout, cli.format, &reply(&escalator, question))?;
        }
        Commands::Chat => {
            let escalator = build_escalator(&cli)?;
            let stdin = io::stdin();
            let interactive = stdin.is_terminal();

            loop {
                if interactive {
                    eprint!("Your question: ");
                    io::stderr().flush()?;
                }
                let mut line = String::new();
                if stdin.lock().read_line(&mut line).context("read question")? == 0 {
                    break;
                }
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                print_reply(&mut stdout, cli.format, &reply(&escalator, question))?;
                stdout.flush()?;
            }
        }
        Commands::Eval {
            cases,
            min_pass_rate,
        } => {
            let escalator = build_escalator(&cli)?;
            let cases: Vec<EvalCase> = read_records(cases)
                .with_context(|| format!("read eval cases {}", cases.display()))?;
            let run_id = format!("eval-{}", chrono::Utc::now().timestamp_millis());
            let summary = evaluate_cases(&escalator, &cases);

            let model = model_name(cli.model_path.as_deref(), "hash");
            print_eval(
                &mut stdout,
                cli.format,
                &run_id,
                &model,
                &summary,
                *min_pass_rate,
            )?;
            stdout.flush()?;

            if !summary.meets(*min_pass_rate) {
                anyhow::bail!(
                    "pass rate {:.4} below required {:.4}",
                    summary.pass_rate,
                    min_pass_rate
                );
            }
        }
        Commands::ExportKb { output } => {
            let kb = load_kb(&cli)?;
            save_entries_jsonl(output, kb.entries())
                .with_context(|| format!("write {}", output.display()))?;
            writeln!(stdout, "exported_entries={} output={}", kb.len(), output.display())?;
        }
        Commands::ValidateKb => {
            let kb = load_kb(&cli)?;
            writeln!(stdout, "valid entries={}", kb.len())?;
        }
    }

    Ok(())
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
