pub mod batch;
pub mod config;
pub mod journal;
pub mod probe;
pub mod storage;

// Re-export engine types for convenience
pub use faceid_core::{
    identity, ConfidenceTier, Embedding, LoadStatus, MatchConfig, MatchDecision, Matcher,
    Recognition, Recognizer,
};
