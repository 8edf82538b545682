//! Domain model for profetch
//!
//! This module contains core domain types and errors that provide:
//! - Signed fetch tasks for numerator and base sources
//! - The provenance map used by remote symbolization
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{FetchTask, MappingKey, MappingSource, MappingSources};

pub use errors::{FetchError, FetchResult};
