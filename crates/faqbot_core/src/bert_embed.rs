use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};

use crate::embed::EmbeddingProvider;
use crate::error::FaqError;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

// ---------------------------------------------------------------------------
// Config (read from the model directory's config.json)
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
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl BertConfig {
    /// paraphrase-multilingual-MiniLM-L12-v2
    #[cfg(test)]
    fn multilingual_minilm_l12() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 12,
            vocab_size: 250037,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        Ok(())
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
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
// Self-attention (separate Q/K/V with biases, absolute positions)
// ---------------------------------------------------------------------------

struct BertSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl BertSelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let attn_vb = vb.pp("attention");

        let query = candle_nn::linear(h, h, attn_vb.pp("self").pp("query"))?;
        let key = candle_nn::linear(h, h, attn_vb.pp("self").pp("key"))?;
        let value = candle_nn::linear(h, h, attn_vb.pp("self").pp("value"))?;
        let output = candle_nn::linear(h, h, attn_vb.pp("output").pp("dense"))?;
        let output_norm = LayerNorm::load(
            attn_vb.pp("output").pp("LayerNorm"),
            h,
            config.layer_norm_eps,
        )?;

        Ok(Self {
            query,
            key,
            value,
            output,
            output_norm,
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
        let attn_weights = q.matmul(&k.t()?)?.affine(1.0 / scale, 0.0)?;
        let attn_weights = candle_nn::ops::softmax(&attn_weights, candle_core::D::Minus1)?;
        let attn_out = attn_weights.matmul(&v)?;

        let attn_out = attn_out.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        let attn_out = self.output.forward(&attn_out)?;

        // Residual + post-norm
        let x = (x + attn_out)?;
        self.output_norm.forward(&x)
    }
}

// ---------------------------------------------------------------------------
// FFN (up + GELU + down, with biases) + post-norm
// ---------------------------------------------------------------------------

struct BertFfn {
    up: Linear,
    down: Linear,
    output_norm: LayerNorm,
}

impl BertFfn {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let up = candle_nn::linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate").pp("dense"),
        )?;
        let down = candle_nn::linear(
            config.intermediate_size,
            config.hidden_size,
            vb.pp("output").pp("dense"),
        )?;
        let output_norm = LayerNorm::load(
            vb.pp("output").pp("LayerNorm"),
            config.hidden_size,
            config.layer_norm_eps,
        )?;
        Ok(Self {
            up,
            down,
            output_norm,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.up.forward(x)?.gelu_erf()?;
        let h = self.down.forward(&h)?;

        let x = (x + h)?;
        self.output_norm.forward(&x)
    }
}

struct BertLayer {
    attention: BertSelfAttention,
    ffn: BertFfn,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let attention = BertSelfAttention::load(vb.clone(), config)?;
        let ffn = BertFfn::load(vb, config)?;
        Ok(Self { attention, ffn })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.attention.forward(x)?;
        self.ffn.forward(&x)
    }
}

// ---------------------------------------------------------------------------
// Full encoder
// ---------------------------------------------------------------------------

struct BertEncoder {
    word_embeddings: Tensor,
    position_embeddings: Tensor,
    token_type_embeddings: Tensor,
    embedding_norm: LayerNorm,
    layers: Vec<BertLayer>,
    config: BertConfig,
}

impl BertEncoder {
    fn load(weights: &Path, config: BertConfig, device: &Device) -> Result<Self> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        // Exports from BertForX carry a "bert." prefix; sentence-transformers ones do not.
        let vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb
        };

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
            layers.push(BertLayer::load(
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

    fn forward(&self, token_ids: &[u32]) -> Result<Vec<f32>> {
        let device = self.word_embeddings.device();
        let seq_len = token_ids.len();

        if seq_len == 0 {
            bail!("tokenizer produced no tokens");
        }
        if seq_len > self.config.max_position_embeddings {
            bail!(
                "input length {seq_len} exceeds max {}",
                self.config.max_position_embeddings
            );
        }

        let ids = Tensor::new(token_ids, device)?;
        let word_emb = self.word_embeddings.index_select(&ids, 0)?;

        let position_ids: Vec<u32> = (0..seq_len as u32).collect();
        let position_ids = Tensor::new(position_ids.as_slice(), device)?;
        let pos_emb = self.position_embeddings.index_select(&position_ids, 0)?;

        let token_type_ids = Tensor::zeros(seq_len, DType::U32, device)?;
        let type_emb = self
            .token_type_embeddings
            .index_select(&token_type_ids, 0)?;

        let mut hidden = ((word_emb + pos_emb)? + type_emb)?;
        hidden = self.embedding_norm.forward(&hidden)?;
        hidden = hidden.unsqueeze(0)?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }

        // Mean pooling over the single unpadded sequence.
        let pooled = hidden.mean(1)?.squeeze(0)?;
        pooled.to_vec1::<f32>().map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Public BertEmbeddingProvider
// ---------------------------------------------------------------------------

/// Sentence encoder for BERT-family checkpoints stored as a Hugging Face
/// model directory (`config.json`, `model.safetensors`, `tokenizer.json`).
pub struct BertEmbeddingProvider {
    encoder: BertEncoder,
    tokenizer: Tokenizer,
}

impl BertEmbeddingProvider {
    pub fn load(model_dir: &Path, max_seq_length: usize) -> crate::Result<Self> {
        let provider = Self::load_files(
            &model_dir.join(CONFIG_FILE),
            &model_dir.join(WEIGHTS_FILE),
            &model_dir.join(TOKENIZER_FILE),
            max_seq_length,
        )
        .map_err(|e| FaqError::ModelLoad {
            path: PathBuf::from(model_dir),
            reason: format!("{e:#}"),
        })?;

        tracing::info!(
            model_dir = %model_dir.display(),
            dimension = provider.dimension(),
            layers = provider.encoder.config.num_hidden_layers,
            "embedding model loaded"
        );
        Ok(provider)
    }

    fn load_files(
        config_path: &Path,
        weights_path: &Path,
        tokenizer_path: &Path,
        max_seq_length: usize,
    ) -> Result<Self> {
        let config = BertConfig::from_file(config_path)?;
        let max_length = max_seq_length.clamp(1, config.max_position_embeddings);

        let device = Device::Cpu;
        let encoder = BertEncoder::load(weights_path, config, &device)
            .with_context(|| format!("load weights {}", weights_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("load tokenizer {}: {e}", tokenizer_path.display()))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("configure truncation: {e}"))?;

        Ok(Self { encoder, tokenizer })
    }
}

impl EmbeddingProvider for BertEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        self.encoder.forward(encoding.get_ids())
    }

    fn dimension(&self) -> usize {
        self.encoder.config.hidden_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cosine_similarity;

    fn model_dir() -> Option<PathBuf> {
        let dir = std::env::var_os("FAQBOT_TEST_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                Path::new(env!("CARGO_MANIFEST_DIR"))
                    .join("../../models")
                    .join(crate::DEFAULT_MODEL_ID)
            });
        if dir.join(WEIGHTS_FILE).exists() && dir.join(TOKENIZER_FILE).exists() {
            Some(dir)
        } else {
            eprintln!("Skipping: model directory {} not found", dir.display());
            None
        }
    }

    #[test]
    fn config_parses_hf_fields_and_defaults() {
        let json = r#"{
            "architectures": ["BertModel"],
            "hidden_size": 384,
            "intermediate_size": 1536,
            "num_attention_heads": 12,
            "num_hidden_layers": 12,
            "vocab_size": 250037,
            "max_position_embeddings": 512
        }"#;
        let config: BertConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.head_dim(), 32);
        assert!((config.layer_norm_eps - 1e-12).abs() < 1e-18);
        assert_eq!(
            config.vocab_size,
            BertConfig::multilingual_minilm_l12().vocab_size
        );
    }

    #[test]
    fn config_rejects_uneven_heads() {
        let mut config = BertConfig::multilingual_minilm_l12();
        config.num_attention_heads = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_model_dir_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BertEmbeddingProvider::load(dir.path(), 128)
            .err()
            .expect("load should fail");
        assert!(matches!(err, FaqError::ModelLoad { .. }));
    }

    #[test]
    fn test_bert_embed_basic() {
        let Some(dir) = model_dir() else { return };
        let provider = BertEmbeddingProvider::load(&dir, crate::DEFAULT_MAX_SEQ_LENGTH).unwrap();

        let a = provider.embed("Quelles sont les dates d'inscription ?").unwrap();
        let b = provider.embed("Quelles sont les dates d'inscription ?").unwrap();

        assert_eq!(a.len(), provider.dimension());
        assert_eq!(a, b);
    }

    #[test]
    fn test_bert_embed_multilingual_similarity() {
        let Some(dir) = model_dir() else { return };
        let provider = BertEmbeddingProvider::load(&dir, crate::DEFAULT_MAX_SEQ_LENGTH).unwrap();

        let fr = provider.embed("Quelles sont les dates d'inscription ?").unwrap();
        let fr_short = provider.embed("dates d'inscription").unwrap();
        let ar = provider.embed("ما هي مواعيد التسجيل ؟").unwrap();
        let unrelated = provider.embed("quelle est la capitale de la France ?").unwrap();

        let sim_short = cosine_similarity(&fr, &fr_short);
        let sim_ar = cosine_similarity(&fr, &ar);
        let sim_unrelated = cosine_similarity(&fr, &unrelated);

        println!("sim(fr, fr_short)  = {sim_short:.4}");
        println!("sim(fr, ar)        = {sim_ar:.4}");
        println!("sim(fr, unrelated) = {sim_unrelated:.4}");

        assert!(sim_short >= crate::DEFAULT_THRESHOLD);
        assert!(sim_short > sim_unrelated);
        assert!(sim_ar > sim_unrelated);
    }
}
