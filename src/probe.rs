//! Reads precomputed face vectors from JSON files.
//!
//! Accepted shapes: a bare array of numbers, or an object with an
//! `encoding` array (as emitted by an extractor service). `null`, an empty
//! array or a missing `encoding` mean the extractor found no face.

use faceid_core::{Embedding, FeatureExtractor};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeFileError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VectorDoc {
    Bare(Option<Vec<f32>>),
    Wrapped {
        #[serde(default)]
        encoding: Option<Vec<f32>>,
    },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VectorFile;

impl FeatureExtractor for VectorFile {
    type Input = Path;
    type Error = ProbeFileError;

    fn extract(&mut self, path: &Path) -> Result<Option<Embedding>, ProbeFileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ProbeFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: VectorDoc = serde_json::from_str(&raw).map_err(|source| ProbeFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let values = match doc {
            VectorDoc::Bare(v) => v,
            VectorDoc::Wrapped { encoding } => encoding,
        };
        Ok(values.filter(|v| !v.is_empty()).map(Embedding::probe))
    }
}
