//! Structured error types for profile handling
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

pub type ProfileResult<T> = Result<T, ProfileError>;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to decode profile: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("malformed profile: {0}")]
    Malformed(String),

    #[error("invalid profile: {0}")]
    Invalid(String),

    #[error("incompatible profiles: {0}")]
    Incompatible(String),

    #[error("invalid frame filter: {0}")]
    FrameFilter(#[from] regex::Error),

    #[error("no profiles to merge")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_display() {
        let err = ProfileError::Incompatible("sample types differ".to_string());
        assert_eq!(err.to_string(), "incompatible profiles: sample types differ");
    }
}
