//! BERT encoder backbone for sequence inputs
//!
//! Wraps the `candle-transformers` BERT implementation. The encoder consumes
//! the named fields of a [`SequenceInput`] and exposes the hidden state of the
//! first (`[CLS]`) token as the shared feature vector for the task heads.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tracing::debug;

use super::{Backbone, ModelInput, SequenceInput};
use crate::config::BertSpec;
use crate::error::{Error, Result};

/// BERT encoder with `[CLS]` pooling
pub struct BertBackbone {
    encoder: BertModel,
    hidden_size: usize,
}

impl BertBackbone {
    /// Build the encoder; weights come from `vb`
    pub fn new(spec: &BertSpec, vb: VarBuilder) -> Result<Self> {
        let config = encoder_config(spec)?;
        let encoder = BertModel::load(vb, &config)?;
        debug!(
            "BERT backbone: {} layers, hidden size {}",
            spec.num_hidden_layers, spec.hidden_size
        );
        Ok(Self {
            encoder,
            hidden_size: spec.hidden_size,
        })
    }

    fn encode(&self, input: &SequenceInput) -> Result<Tensor> {
        let hidden = self.encoder.forward(
            &input.input_ids,
            &input.token_type_ids,
            Some(&input.attention_mask),
        )?;
        Ok(hidden.narrow(1, 0, 1)?.squeeze(1)?)
    }
}

impl Backbone for BertBackbone {
    fn features(&self, input: &ModelInput, _train: bool) -> Result<Tensor> {
        match input {
            ModelInput::Sequence(seq) => self.encode(seq),
            ModelInput::Dense(_) => Err(Error::invalid_input(
                "BERT backbone expects a sequence encoding (input ids, attention mask, segment ids)",
            )),
        }
    }

    fn feature_dim(&self) -> usize {
        self.hidden_size
    }
}

/// Translate the registry entry into the encoder configuration
fn encoder_config(spec: &BertSpec) -> Result<BertConfig> {
    if spec.num_attention_heads == 0 || spec.hidden_size % spec.num_attention_heads != 0 {
        return Err(Error::config(format!(
            "hidden size {} is not divisible by {} attention heads",
            spec.hidden_size, spec.num_attention_heads
        )));
    }

    let value = serde_json::json!({
        "vocab_size": spec.vocab_size,
        "hidden_size": spec.hidden_size,
        "num_hidden_layers": spec.num_hidden_layers,
        "num_attention_heads": spec.num_attention_heads,
        "intermediate_size": spec.intermediate_size,
        "hidden_act": "gelu",
        "hidden_dropout_prob": spec.hidden_dropout_prob,
        "max_position_embeddings": spec.max_position_embeddings,
        "type_vocab_size": spec.type_vocab_size,
        "initializer_range": 0.02,
        "layer_norm_eps": spec.layer_norm_eps,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": false,
        "classifier_dropout": null,
        "model_type": "bert",
    });
    Ok(serde_json::from_value(value)?)
}
