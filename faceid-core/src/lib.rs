//! Face-matching and decision engine.
//!
//! [`RegistryCache`] holds enrolled vectors behind a swappable snapshot and
//! [`Matcher`] decides a probe against one snapshot. [`Recognizer`] wires
//! them to an external [`FeatureExtractor`].

pub mod embedding;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod matcher;
pub mod metric;
pub mod pipeline;
pub mod registry;

// Re-export commonly used types
pub use embedding::Embedding;
pub use error::{ConfigError, EmbeddingError, ProbeError, SourceError};
pub use extractor::FeatureExtractor;
pub use identity::{EnrolledIdentity, IdentityId, Profile, RegistryRecord};
pub use matcher::{
    ConfidenceTier, IdentityRef, MatchConfig, MatchDecision, Matcher, Outcome, RegistryStats,
    TierBoundaries,
};
pub use metric::Metric;
pub use pipeline::{Recognition, RecognizeError, Recognizer};
pub use registry::{LoadStatus, RegistryCache, RegistrySnapshot, RegistrySource};
