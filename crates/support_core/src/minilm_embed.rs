use anyhow::Result;
use candle_core::Device;
use std::path::Path;

use crate::bert::{mmap_weights, BertConfig, BertEncoder};
use crate::embed::EmbeddingProvider;

/// all-MiniLM-L6-v2 sentence embeddings: mean pooling over the last hidden
/// layer, then L2 normalisation.
pub struct MiniLmEmbeddingProvider {
    encoder: BertEncoder,
    tokenizer: tokenizers::Tokenizer,
}

impl MiniLmEmbeddingProvider {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let device = Device::Cpu;
        let vb = mmap_weights(model_path, &device)?;
        let encoder = BertEncoder::load(vb, BertConfig::all_minilm_l6_v2())?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: encoder.config().max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("configure truncation: {e}"))?;
        tokenizer.with_padding(None);

        Ok(Self { encoder, tokenizer })
    }
}

impl EmbeddingProvider for MiniLmEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let hidden = self
            .encoder
            .forward(encoding.get_ids(), encoding.get_type_ids())?;

        let pooled = hidden.mean(1)?.squeeze(0)?;
        let norm_val: f32 = pooled.sqr()?.sum_all()?.sqrt()?.to_scalar()?;
        let normalized = if norm_val > 0.0 {
            pooled.affine(1.0 / norm_val as f64, 0.0)?
        } else {
            pooled
        };

        normalized.to_vec1::<f32>().map_err(Into::into)
    }
}
