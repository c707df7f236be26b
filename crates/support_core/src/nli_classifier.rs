use anyhow::{bail, Context, Result};
use candle_core::{Device, Module};
use candle_nn::Linear;
use std::path::Path;

use crate::bert::{mmap_weights, BertConfig, BertEncoder};
use crate::classifier::{softmax, ZeroShotClassifier};
use crate::model::LabelScore;

pub const DEFAULT_HYPOTHESIS_TEMPLATE: &str = "This example is {}.";

/// Zero-shot classification with a BERT NLI cross-encoder.
///
/// Each candidate label becomes a hypothesis ("This example is {label}.")
/// paired with the text as premise. The entailment logits of all pairs are
/// normalised with a softmax across candidates, so scores sum to one.
///
/// Expects a directory holding `config.json` (with an `entailment` entry in
/// `id2label`), `model.safetensors` and `tokenizer.json`.
pub struct NliZeroShotClassifier {
    encoder: BertEncoder,
    pooler: Linear,
    head: Linear,
    tokenizer: tokenizers::Tokenizer,
    entailment: usize,
    hypothesis_template: String,
}

impl NliZeroShotClassifier {
    pub fn load(model_dir: &Path, hypothesis_template: &str) -> Result<Self> {
        if !hypothesis_template.contains("{}") {
            bail!("hypothesis template {hypothesis_template:?} has no {{}} placeholder");
        }

        let config = BertConfig::from_file(&model_dir.join("config.json"))?;
        let num_labels = config.id2label.len();
        let entailment = config
            .label_index("entailment")
            .context("config.json id2label has no entailment label")?;
        if entailment >= num_labels {
            bail!("entailment index {entailment} out of range for {num_labels} labels");
        }
        let hidden = config.hidden_size;

        let device = Device::Cpu;
        let vb = mmap_weights(&model_dir.join("model.safetensors"), &device)?;
        let encoder = BertEncoder::load(vb.pp("bert"), config)?;
        let pooler = candle_nn::linear(hidden, hidden, vb.pp("bert").pp("pooler").pp("dense"))?;
        let head = candle_nn::linear(hidden, num_labels, vb.pp("classifier"))?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: encoder.config().max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("configure truncation: {e}"))?;
        tokenizer.with_padding(None);

        Ok(Self {
            encoder,
            pooler,
            head,
            tokenizer,
            entailment,
            hypothesis_template: hypothesis_template.to_string(),
        })
    }

    fn entailment_logit(&self, premise: &str, hypothesis: &str) -> Result<f32> {
        let encoding = self
            .tokenizer
            .encode((premise, hypothesis), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let hidden = self
            .encoder
            .forward(encoding.get_ids(), encoding.get_type_ids())?;

        // [CLS] -> pooler (dense + tanh) -> classification head
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.head.forward(&pooled)?.squeeze(0)?.to_vec1::<f32>()?;

        logits
            .get(self.entailment)
            .copied()
            .context("classification head returned too few logits")
    }
}

impl ZeroShotClassifier for NliZeroShotClassifier {
    fn classify(&self, text: &str, candidate_labels: &[String]) -> Result<Vec<LabelScore>> {
        let mut logits = Vec::with_capacity(candidate_labels.len());
        for label in candidate_labels {
            let hypothesis = self.hypothesis_template.replace("{}", label);
            logits.push(self.entailment_logit(text, &hypothesis)?);
        }

        let mut scored: Vec<LabelScore> = candidate_labels
            .iter()
            .zip(softmax(&logits))
            .map(|(label, score)| LabelScore {
                label: label.clone(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }
}
