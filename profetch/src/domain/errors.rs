//! Structured error types for profetch
//!
//! Using thiserror for automatic Display implementation and error chaining.

use profetch_common::ProfileError;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("http fetch {url}: {error}")]
    Http { url: String, error: String },

    #[error("server response: {0}")]
    HttpStatus(String),

    #[error("open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to convert perf.data file. Try github.com/google/perf_data_converter: {0}")]
    Conversion(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("failed to fetch any profiles")]
    NoProfilesFetched,

    #[error("failed to identify temp dir")]
    NoTempDir,

    #[error("symbolization failed: {0}")]
    Symbolization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
