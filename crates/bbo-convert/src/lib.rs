use std::path::{Path, PathBuf};

use bbo_core::TrialResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to read results file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed results file: {path}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Parses the results file a user script wrote into structured records.
/// Parsing succeeds fully or fails fully; record order is preserved.
pub trait ResultReader: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<TrialResult>, ConvertError>;
}

/// Reads a JSON array of `{name, type, value}` records. An empty file is
/// malformed, not an empty result set.
pub struct JsonReader;

impl ResultReader for JsonReader {
    fn parse(&self, path: &Path) -> Result<Vec<TrialResult>, ConvertError> {
        let bytes = std::fs::read(path).map_err(|source| ConvertError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConvertError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}
