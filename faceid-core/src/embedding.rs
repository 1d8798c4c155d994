use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Face embedding produced by an external extractor.
///
/// Construction through [`Embedding::new`] guarantees a non-empty, finite,
/// non-zero vector. Probes built with [`Embedding::probe`] skip the norm
/// check so a blank probe still scores (as zero) instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        let emb = Self {
            vector: Array1::from_vec(values),
        };
        if emb.norm() == 0.0 {
            return Err(EmbeddingError::ZeroNorm);
        }
        Ok(emb)
    }

    /// Wrap a probe vector without validation; the matcher validates it.
    pub fn probe(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.vector.view()
    }

    pub fn norm(&self) -> f32 {
        self.vector.dot(&self.vector).sqrt()
    }

    /// L2-normalized copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        if norm > 0.0 {
            Self {
                vector: &self.vector / norm,
            }
        } else {
            self.clone()
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_vectors() {
        assert_eq!(Embedding::new(vec![]), Err(EmbeddingError::Empty));
        assert_eq!(
            Embedding::new(vec![1.0, f32::NAN]),
            Err(EmbeddingError::NonFinite { index: 1 })
        );
        assert_eq!(Embedding::new(vec![0.0; 4]), Err(EmbeddingError::ZeroNorm));
    }

    #[test]
    fn test_normalized_has_unit_norm() {
        let emb = Embedding::new(vec![3.0, 4.0]).unwrap();
        assert!((emb.norm() - 5.0).abs() < 1e-6);
        let unit = emb.normalized();
        assert!((unit.norm() - 1.0).abs() < 1e-6);
        assert!((unit.vector[0] - 0.6).abs() < 1e-6);
    }
}
