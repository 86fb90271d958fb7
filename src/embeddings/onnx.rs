//! ONNX Runtime embedder for BERT-style sentence encoders (gte-small by default)

use super::EmbeddingEngine;
use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use ort::{inputs, session::Session, value::Value};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::config::EmbeddingConfig;
use crate::models;

/// ONNX-based embedding generator
pub struct OnnxEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    dimension: usize,
    model_name: String,
    query_prefix: Option<String>,
    normalize: bool,
}

impl OnnxEmbedder {
    /// Load model and tokenizer named by the `[embedding]` section
    ///
    /// When `sha256` is pinned the model file is hashed before loading.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        if let Some(expected) = &config.sha256 {
            models::verify_sha256(&config.model_path, expected)?;
        }

        let mut embedder = Self::new_from_paths(
            &config.model_path,
            &config.tokenizer_path,
            &config.model_name,
            config.dimension,
            config.max_length,
        )?;
        embedder.query_prefix = config.query_prefix.clone();
        embedder.normalize = config.normalize;
        Ok(embedder)
    }

    /// Create an embedder from explicit model and tokenizer files
    ///
    /// Output is raw mean pooling; see [`OnnxEmbedder::from_config`] for
    /// prefixes and normalisation.
    pub fn new_from_paths(
        model_path: &Path,
        tokenizer_path: &Path,
        model_name: &str,
        dimension: usize,
        max_length: usize,
    ) -> Result<Self> {
        if !model_path.exists() {
            bail!(
                "ONNX model not found at: {}\n\n\
                Download it with:\n  \
                vecbench model fetch",
                model_path.display()
            );
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

        if !tokenizer_path.exists() {
            bail!(
                "Tokenizer not found at: {}\n\n\
                Download it with:\n  \
                vecbench model fetch",
                tokenizer_path.display()
            );
        }

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        // Longer inputs fail to broadcast against the position embeddings
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;

        tracing::debug!(
            model = model_name,
            dimension,
            max_length,
            "loaded ONNX embedder"
        );

        Ok(Self {
            session,
            tokenizer,
            dimension,
            model_name: model_name.to_string(),
            query_prefix: None,
            normalize: false,
        })
    }

    /// Tokenize text into input_ids and attention_mask
    fn tokenize(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>)> {
        let encoding = self
            .tokenizer
            .encode(text, true) // [CLS] ... [SEP]
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let input_ids = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let attention_mask = encoding
            .get_attention_mask()
            .iter()
            .map(|&x| x as i64)
            .collect();

        Ok((input_ids, attention_mask))
    }
}

/// Mean pooling: average token embeddings weighted by the attention mask
///
/// Returns zeros when every mask entry is 0.
pub fn mean_pooling(token_embeddings: &Array2<f32>, attention_mask: &[i64]) -> Vec<f32> {
    let hidden = token_embeddings.ncols();
    let mut pooled = vec![0.0; hidden];
    let mut mask_sum = 0.0f32;

    for (i, &mask) in attention_mask.iter().enumerate() {
        if mask == 0 || i >= token_embeddings.nrows() {
            continue;
        }
        mask_sum += 1.0;
        for (j, value) in pooled.iter_mut().enumerate() {
            *value += token_embeddings[[i, j]];
        }
    }

    if mask_sum == 0.0 {
        return pooled;
    }
    pooled.iter().map(|&x| x / mask_sum).collect()
}

/// L2 normalize a vector; zero vectors are returned unchanged
pub fn normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / norm).collect()
}

impl EmbeddingEngine for OnnxEmbedder {
    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        let input = if let Some(prefix) = &self.query_prefix {
            format!("{}{}", prefix, text)
        } else {
            text.to_string()
        };
        self.embed(&input)
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) = self.tokenize(text)?;

        let seq_len = input_ids.len();
        let input_ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
            .context("Failed to create input_ids array")?;
        let attention_mask_array =
            Array2::from_shape_vec((1, attention_mask.len()), attention_mask.clone())
                .context("Failed to create attention_mask array")?;
        // Single segment
        let token_type_ids_array = Array2::from_shape_vec((1, seq_len), vec![0i64; seq_len])
            .context("Failed to create token_type_ids array")?;

        // Outputs borrow the session; finish with them before pooling
        let token_embeddings = {
            let outputs = self
                .session
                .run(inputs![
                    "input_ids" => Value::from_array(input_ids_array)?,
                    "attention_mask" => Value::from_array(attention_mask_array)?,
                    "token_type_ids" => Value::from_array(token_type_ids_array)?
                ])
                .context("ONNX inference failed")?;

            let (shape, data) = outputs["last_hidden_state"]
                .try_extract_tensor::<f32>()
                .context("Failed to extract last_hidden_state tensor")?;

            // [batch=1, seq_len, hidden]
            let dims = shape.as_ref();
            if dims.len() != 3 {
                bail!("Expected 3D tensor, got shape: {:?}", dims);
            }
            let rows = dims[1] as usize;
            let hidden = dims[2] as usize;
            if hidden != self.dimension {
                bail!(
                    "model {} produced {}-dimensional embeddings, configured dimension is {}",
                    self.model_name,
                    hidden,
                    self.dimension
                );
            }

            Array2::from_shape_vec((rows, hidden), data[..rows * hidden].to_vec())
                .context("Failed to reshape token embeddings")?
        };

        let pooled = mean_pooling(&token_embeddings, &attention_mask);
        Ok(if self.normalize {
            normalize(&pooled)
        } else {
            pooled
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
