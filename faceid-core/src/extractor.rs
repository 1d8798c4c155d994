use crate::Embedding;

/// Contract with the external feature extractor.
///
/// `Ok(None)` means no face was found in the input. That is an expected
/// outcome, not an error; `Err` is reserved for extractor failures.
pub trait FeatureExtractor {
    type Input: ?Sized;
    type Error: std::error::Error + 'static;

    fn extract(&mut self, input: &Self::Input) -> Result<Option<Embedding>, Self::Error>;
}
