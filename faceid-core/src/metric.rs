//! Pairwise scoring between a probe and an enrolled embedding.
//!
//! Every metric reports two numbers: a distance (lower is closer, used for
//! the ambiguity band) and a similarity in `[0, 1]` (higher is better, used
//! for threshold and tiers).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Embedding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity on the raw vectors. Distance is `1 - cos`.
    #[default]
    Cosine,
    /// Euclidean distance between L2-normalized vectors, in `[0, 2]`.
    /// Similarity is `max(0, 1 - distance)`.
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub distance: f32,
    pub similarity: f32,
}

impl Metric {
    /// Score two embeddings of equal length. Callers must filter on
    /// dimension first; mismatched inputs score as maximally distant.
    pub fn score(self, a: &Embedding, b: &Embedding) -> Score {
        if a.dim() != b.dim() {
            return Score {
                distance: self.max_distance(),
                similarity: 0.0,
            };
        }
        match self {
            Metric::Cosine => {
                let cos = cosine_similarity(a, b);
                Score {
                    distance: 1.0 - cos,
                    similarity: cos.max(0.0),
                }
            }
            Metric::Euclidean => {
                let d = normalized_euclidean(a, b);
                Score {
                    distance: d,
                    similarity: (1.0 - d).max(0.0),
                }
            }
        }
    }

    pub fn max_distance(self) -> f32 {
        2.0
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Cosine similarity in `[-1, 1]`, accumulated in f64.
/// Zero vectors score 0.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.vector.iter().zip(b.vector.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Euclidean distance after scaling both vectors to unit length.
pub fn normalized_euclidean(a: &Embedding, b: &Embedding) -> f32 {
    let norm_a = a.norm() as f64;
    let norm_b = b.norm() as f64;
    let sum: f64 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(&x, &y)| {
            let x = if norm_a > 0.0 { x as f64 / norm_a } else { 0.0 };
            let y = if norm_b > 0.0 { y as f64 / norm_b } else { 0.0 };
            (x - y) * (x - y)
        })
        .sum();
    (sum.sqrt() as f32).min(2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::probe(v.to_vec())
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let s = Metric::Cosine.score(&emb(&[1.0, 0.0, 0.0]), &emb(&[2.0, 0.0, 0.0]));
        assert!((s.similarity - 1.0).abs() < 1e-6);
        assert!(s.distance.abs() < 1e-6);

        let s = Metric::Cosine.score(&emb(&[1.0, 0.0, 0.0]), &emb(&[0.0, 1.0, 0.0]));
        assert!(s.similarity.abs() < 1e-6);
        assert!((s.distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_clamps_similarity() {
        let s = Metric::Cosine.score(&emb(&[1.0, 0.0]), &emb(&[-1.0, 0.0]));
        assert_eq!(s.similarity, 0.0);
        assert!((s.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_half_angle() {
        let s = Metric::Cosine.score(&emb(&[0.5, 0.5, 0.0]), &emb(&[1.0, 0.0, 0.0]));
        assert!((s.similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn test_euclidean_similarity() {
        let s = Metric::Euclidean.score(&emb(&[3.0, 4.0]), &emb(&[0.6, 0.8]));
        assert!(s.distance < 1e-6);
        assert!((s.similarity - 1.0).abs() < 1e-6);

        // orthogonal unit vectors are sqrt(2) apart
        let s = Metric::Euclidean.score(&emb(&[1.0, 0.0]), &emb(&[0.0, 1.0]));
        assert!((s.distance - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(s.similarity, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_max_distance() {
        let s = Metric::Cosine.score(&emb(&[1.0, 0.0]), &emb(&[1.0, 0.0, 0.0]));
        assert_eq!(s.similarity, 0.0);
        assert_eq!(s.distance, 2.0);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&emb(&[0.0, 0.0]), &emb(&[1.0, 0.0])), 0.0);
    }
}
