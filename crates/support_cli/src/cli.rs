use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use support_core::DEFAULT_REQUIRED_PASS_RATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "support-agent",
    version,
    about = "Answer support questions from a fixed FAQ"
)]
pub struct Cli {
    /// TOML file with thresholds, messages and timeouts.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Knowledge base file (.json array or .jsonl). Defaults to the built-in FAQ.
    #[arg(long, global = true)]
    pub kb: Option<PathBuf>,

    /// all-MiniLM-L6-v2 .safetensors weights. Without it, hashed bag-of-words embeddings are used.
    #[arg(long, global = true)]
    pub model_path: Option<PathBuf>,

    /// tokenizer.json for --model-path.
    #[arg(long, global = true)]
    pub tokenizer_path: Option<PathBuf>,

    /// Directory with an NLI cross-encoder (config.json, model.safetensors, tokenizer.json).
    /// Without it, a word-overlap classifier is used.
    #[arg(long, global = true)]
    pub classifier_dir: Option<PathBuf>,

    /// Overrides `classifier_timeout` from the config file ("0s" disables it).
    #[arg(long, global = true)]
    pub classifier_timeout: Option<humantime::Duration>,

    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Answer a single question.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Answer questions read line by line from stdin.
    Chat,
    /// Run labelled cases and report the pass rate.
    Eval {
        #[arg(long)]
        cases: PathBuf,
        #[arg(long, default_value_t = DEFAULT_REQUIRED_PASS_RATE)]
        min_pass_rate: f32,
    },
    /// Write the active knowledge base as JSONL.
    ExportKb {
        #[arg(long)]
        output: PathBuf,
    },
    /// Load and validate the knowledge base without loading any model.
    ValidateKb,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.model_path.is_some() != self.tokenizer_path.is_some() {
            return Err("--model-path and --tokenizer-path must both be provided".to_string());
        }
        if let Commands::Eval { min_pass_rate, .. } = &self.command {
            if !(0.0..=1.0).contains(min_pass_rate) {
                return Err("--min-pass-rate must be within [0, 1]".to_string());
            }
        }
        Ok(())
    }
}
