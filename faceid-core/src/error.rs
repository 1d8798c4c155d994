use thiserror::Error;

/// Invalid feature vector handed to [`crate::Embedding::new`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding: vector is empty")]
    Empty,

    #[error("embedding: component {index} is not finite")]
    NonFinite { index: usize },

    #[error("embedding: vector has zero norm")]
    ZeroNorm,
}

/// Malformed probe passed to the matcher. These are caller bugs and are
/// never folded into a soft decision.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe: vector is empty")]
    Empty,

    #[error("probe: component {index} is not finite")]
    NonFinite { index: usize },
}

/// Failure reported by a registry backend.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("registry source: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry source: decode failed: {0}")]
    Decode(String),

    #[error("registry source: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("config: threshold {0} outside [0, 1]")]
    Threshold(f32),

    #[error("config: high confidence cutoff {0} outside [0, 1]")]
    HighConfidenceCutoff(f32),

    #[error("config: ambiguity slack {0} must be non-negative")]
    AmbiguitySlack(f32),

    #[error("config: tier boundaries inverted: high {high} < medium {medium}")]
    TierOrder { high: f32, medium: f32 },

    #[error("config: precision {0} exceeds 6 decimal places")]
    Precision(u32),
}
