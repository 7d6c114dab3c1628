//! Label vocabulary and logit interpretation.

use candle_core::{DType, Tensor};
use specvit_core::{VitError, VitResult};
use std::collections::HashMap;

/// Ordered, duplicate-free set of class names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

/// One scored label for one batch row.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub logit: f32,
    pub probability: f32,
}

impl LabelSet {
    pub fn new(names: Vec<String>) -> VitResult<Self> {
        if names.is_empty() {
            return Err(VitError::config("label vocabulary must not be empty"));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(VitError::config(format!("duplicate label {name:?}")));
            }
        }
        Ok(Self { names, index })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Best `k` labels per batch row of a `[batch, num_labels]` logits tensor,
    /// highest probability first.
    pub fn top_k(&self, logits: &Tensor, k: usize) -> VitResult<Vec<Vec<Prediction>>> {
        let (_, num_labels) = logits.dims2()?;
        if num_labels != self.len() {
            return Err(VitError::shape(format!(
                "logits have {num_labels} classes, label set has {}",
                self.len()
            )));
        }

        let logits = logits.to_dtype(DType::F32)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?;
        let logits: Vec<Vec<f32>> = logits.to_vec2()?;
        let probs: Vec<Vec<f32>> = probs.to_vec2()?;

        Ok(logits
            .iter()
            .zip(&probs)
            .map(|(row_logits, row_probs)| {
                let mut row: Vec<Prediction> = row_logits
                    .iter()
                    .zip(row_probs)
                    .enumerate()
                    .map(|(index, (&logit, &probability))| Prediction {
                        index,
                        label: self.names[index].clone(),
                        logit,
                        probability,
                    })
                    .collect();
                row.sort_by(|a, b| b.probability.total_cmp(&a.probability));
                row.truncate(k);
                row
            })
            .collect())
    }
}
