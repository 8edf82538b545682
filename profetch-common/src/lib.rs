//! # Sampled Profile Data Type
//!
//! The profile representation shared by the fetch engine and its callers.
//! Profiles use the pprof `profile.proto` wire format and are normally
//! exchanged gzip-compressed (`*.pb.gz`).
//!
//! ## Operations
//!
//! - [`Profile::parse`] / [`Profile::write`] - decode and encode
//! - [`Profile::check_valid`] - internal consistency check
//! - [`Profile::scale`] / [`Profile::scale_n`] - multiply sample values
//! - [`Profile::remove_uninteresting`] - prune frames matching the
//!   profile's own `drop_frames` filter
//! - [`merge`] - combine compatible profiles, summing identical samples
//! - [`measurement::scale_profiles`] - bring profiles to common units before
//!   merging them

pub mod error;
pub mod measurement;
pub mod merge;
pub mod profile;
pub mod proto;
mod prune;

pub use error::{ProfileError, ProfileResult};
pub use merge::merge;
pub use profile::{Function, Label, Line, Location, Mapping, Profile, Sample, ValueType};
