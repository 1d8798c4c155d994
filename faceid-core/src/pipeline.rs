use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::error::{ConfigError, ProbeError};
use crate::extractor::FeatureExtractor;
use crate::matcher::{self, MatchConfig, MatchDecision, Matcher, RegistryStats};
use crate::registry::{LoadStatus, RegistryCache, RegistrySnapshot, RegistrySource};
use crate::Embedding;

#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// Extractor found no face; the matcher was not consulted.
    NoFaceDetected,
    Decision(MatchDecision),
}

#[derive(Error, Debug)]
pub enum RecognizeError<E: std::error::Error + 'static> {
    #[error("feature extraction failed: {0}")]
    Extractor(#[source] E),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Full pipeline: extract → snapshot → match
pub struct Recognizer<S> {
    cache: RegistryCache<S>,
    matcher: Matcher,
}

impl<S: RegistrySource> Recognizer<S> {
    pub fn new(source: S, config: MatchConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: RegistryCache::new(source),
            matcher: Matcher::new(config)?,
        })
    }

    pub fn load(&self) -> LoadStatus {
        self.cache.load()
    }

    pub fn reload(&self) -> LoadStatus {
        info!("Reloading registry");
        self.cache.reload()
    }

    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.cache.snapshot()
    }

    /// Match a probe against one snapshot of the registry. Before the first
    /// successful load the decision is [`Outcome::NotReady`](crate::Outcome::NotReady).
    pub fn identify(&self, probe: &Embedding) -> Result<MatchDecision, ProbeError> {
        if !self.cache.is_ready() {
            matcher::check_probe(probe)?;
            return Ok(self.matcher.not_ready());
        }
        let snapshot = self.cache.snapshot();
        self.matcher.identify(probe, &snapshot)
    }

    /// Run the extractor on `input`, then match.
    pub fn recognize<X: FeatureExtractor>(
        &self,
        extractor: &mut X,
        input: &X::Input,
    ) -> Result<Recognition, RecognizeError<X::Error>> {
        let probe = match extractor.extract(input).map_err(RecognizeError::Extractor)? {
            Some(probe) => probe,
            None => return Ok(Recognition::NoFaceDetected),
        };
        Ok(Recognition::Decision(self.identify(&probe)?))
    }

    pub fn stats(&self) -> RegistryStats {
        self.matcher.stats(&self.cache.snapshot())
    }

    pub fn cache(&self) -> &RegistryCache<S> {
        &self.cache
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}
