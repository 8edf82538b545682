//! # profetch - Fetch and Merge Sampled Profiles
//!
//! profetch collects pprof profiles from any mix of HTTP endpoints, local
//! profile files and perf captures, merges them into one aggregate profile,
//! and attaches symbol information. Base sources can be subtracted to get a
//! differential profile.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   SOURCES: http://host/debug/pprof/profile, host:port/path,      │
//! │            ./cpu.pb.gz, perf.data                                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ chunks of 64, one thread per source
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    profetch (This Crate)                         │
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐          │
//! │  │   Resolver   │──▶│   Locator    │──▶│    Merge     │          │
//! │  │ (HTTP/file)  │   │ (local bins) │   │ (+provenance)│          │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘          │
//! │                                               │                  │
//! │                                               ▼                  │
//! │                      ┌──────────────┐   ┌──────────────┐         │
//! │                      │     Save     │◀──│ Symbolizer   │         │
//! │                      │ (pprof.*.gz) │   │(DWARF/symbolz)│        │
//! │                      └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`fetch`]: the acquisition pipeline
//!   - `resolver`: classify a source and fetch it over HTTP or from disk
//!   - `locator`: find local copies of profiled binaries
//!   - `concurrent` / `chunked`: bounded parallel fetch
//!   - `combine`: unit normalization, merge and provenance union
//!
//! - [`symbolization`]: local DWARF and remote symbolz symbolization
//!
//! - [`save`]: keep fetched remote profiles on disk
//!
//! - [`plugin`]: the seams callers can override (fetcher, object tool, UI,
//!   symbolizer)
//!
//! - [`config`]: per-run options and the environment snapshot
//!
//! - [`domain`]: fetch tasks, the provenance map and errors
//!
//! - [`cli`]: command-line argument parsing
//!
//! ## Typical Usage
//!
//! ```bash
//! # Profile a server for 30 seconds
//! profetch --seconds 30 localhost:6060/debug/pprof/profile -o cpu.pb.gz
//!
//! # Difference between two heap snapshots
//! profetch heap-after.pb.gz --base heap-before.pb.gz -o diff.pb.gz
//! ```
//!
//! ## Environment
//!
//! - `PPROF_TMPDIR`: where fetched remote profiles are saved
//! - `PPROF_BINARY_PATH`: directories searched for local binaries
//! - `HOME`: defaults for both of the above

pub mod cli;
pub mod config;
pub mod domain;
pub mod fetch;
pub mod plugin;
pub mod save;
pub mod symbolization;

pub use config::{FetchEnv, SourceConfig};
pub use fetch::{fetch_profiles, Options};
