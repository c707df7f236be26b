use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config (HF `config.json` subset)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub id2label: HashMap<String, String>,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl BertConfig {
    pub fn all_minilm_l6_v2() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            id2label: HashMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read model config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse model config {}", path.display()))?;
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
            bail!(
                "hidden_size {} is not divisible by {} attention heads",
                config.hidden_size,
                config.num_attention_heads
            );
        }
        Ok(config)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Class index whose label matches `name`, case-insensitively.
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.id2label.iter().find_map(|(id, label)| {
            if label.eq_ignore_ascii_case(name) {
                id.parse().ok()
            } else {
                None
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Layer norm (with bias)
// ---------------------------------------------------------------------------

struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(vb: VarBuilder, hidden_size: usize, eps: f64) -> Result<Self> {
        let weight = vb.get(hidden_size, "weight")?;
        let bias = vb.get(hidden_size, "bias")?;
        Ok(Self { weight, bias, eps })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let mean = x.mean_keepdim(candle_core::D::Minus1)?;
        let diff = x.broadcast_sub(&mean)?;
        let var = diff.sqr()?.mean_keepdim(candle_core::D::Minus1)?;
        let std = (var + self.eps)?.sqrt()?;
        let normed = diff.broadcast_div(&std)?;
        let out = normed
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?;
        out.to_dtype(x_dtype).map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Self-attention
// ---------------------------------------------------------------------------

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let attn_vb = vb.pp("attention");

        Ok(Self {
            query: candle_nn::linear(h, h, attn_vb.pp("self").pp("query"))?,
            key: candle_nn::linear(h, h, attn_vb.pp("self").pp("key"))?,
            value: candle_nn::linear(h, h, attn_vb.pp("self").pp("value"))?,
            output: candle_nn::linear(h, h, attn_vb.pp("output").pp("dense"))?,
            output_norm: LayerNorm::load(
                attn_vb.pp("output").pp("LayerNorm"),
                h,
                config.layer_norm_eps,
            )?,
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq_len: usize) -> Result<Tensor> {
        x.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
            .map_err(Into::into)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?, batch, seq_len)?;
        let k = self.split_heads(&self.key.forward(x)?, batch, seq_len)?;
        let v = self.split_heads(&self.value.forward(x)?, batch, seq_len)?;

        let scale = (self.head_dim as f64).sqrt();
        let weights = q.matmul(&k.t()?)?.affine(1.0 / scale, 0.0)?;
        let weights = candle_nn::ops::softmax(&weights, candle_core::D::Minus1)?;
        let out = weights.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        let out = self.output.forward(&out)?;
        self.output_norm.forward(&(x + out)?)
    }
}

// ---------------------------------------------------------------------------
// Encoder layer: attention + FFN, both post-norm
// ---------------------------------------------------------------------------

struct EncoderLayer {
    attention: SelfAttention,
    up: Linear,
    down: Linear,
    ffn_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(vb.clone(), config)?,
            up: candle_nn::linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            down: candle_nn::linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            ffn_norm: LayerNorm::load(
                vb.pp("output").pp("LayerNorm"),
                config.hidden_size,
                config.layer_norm_eps,
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.attention.forward(x)?;
        let h = self.up.forward(&x)?.gelu_erf()?;
        let h = self.down.forward(&h)?;
        self.ffn_norm.forward(&(x + h)?)
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// A BERT encoder. `forward` returns the final hidden states for a single
/// unpadded sequence, shaped `(1, seq_len, hidden)`.
pub struct BertEncoder {
    word_embeddings: Tensor,
    position_embeddings: Tensor,
    token_type_embeddings: Tensor,
    embedding_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    config: BertConfig,
}

impl BertEncoder {
    pub fn load(vb: VarBuilder, config: BertConfig) -> Result<Self> {
        let emb_vb = vb.pp("embeddings");
        let word_embeddings = emb_vb
            .pp("word_embeddings")
            .get((config.vocab_size, config.hidden_size), "weight")?;
        let position_embeddings = emb_vb.pp("position_embeddings").get(
            (config.max_position_embeddings, config.hidden_size),
            "weight",
        )?;
        let token_type_embeddings = emb_vb
            .pp("token_type_embeddings")
            .get((config.type_vocab_size, config.hidden_size), "weight")?;
        let embedding_norm = LayerNorm::load(
            emb_vb.pp("LayerNorm"),
            config.hidden_size,
            config.layer_norm_eps,
        )?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::load(
                vb.pp("encoder").pp("layer").pp(i.to_string()),
                &config,
            )?);
        }

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            embedding_norm,
            layers,
            config,
        })
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        self.word_embeddings.device()
    }

    pub fn forward(&self, token_ids: &[u32], type_ids: &[u32]) -> Result<Tensor> {
        let device = self.device();
        let seq_len = token_ids.len();

        if seq_len == 0 {
            bail!("empty token sequence");
        }
        if seq_len > self.config.max_position_embeddings {
            bail!(
                "input length {seq_len} exceeds max {}",
                self.config.max_position_embeddings
            );
        }
        if type_ids.len() != seq_len {
            bail!("{} type ids for {seq_len} tokens", type_ids.len());
        }

        let ids = Tensor::new(token_ids, device)?;
        let word_emb = self.word_embeddings.index_select(&ids, 0)?;

        let position_ids: Vec<u32> = (0..seq_len as u32).collect();
        let position_ids = Tensor::new(position_ids.as_slice(), device)?;
        let pos_emb = self.position_embeddings.index_select(&position_ids, 0)?;

        let type_ids = Tensor::new(type_ids, device)?;
        let type_emb = self.token_type_embeddings.index_select(&type_ids, 0)?;

        let mut hidden = ((word_emb + pos_emb)? + type_emb)?;
        hidden = self.embedding_norm.forward(&hidden)?;
        hidden = hidden.unsqueeze(0)?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }

        Ok(hidden)
    }
}

/// Loads safetensors weights memory-mapped onto the CPU.
pub fn mmap_weights(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    // SAFETY: the weights file must not be modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
    Ok(vb)
}
