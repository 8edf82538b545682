//! Pluggable seams of the fetch engine
//!
//! Callers can override how sources are fetched, how binaries are opened,
//! where user-facing messages go and how profiles are symbolized. Every
//! trait is `Send + Sync` because fetch units run on parallel threads.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use object::Object;
use profetch_common::Profile;

use crate::domain::{FetchResult, MappingSources};
use crate::symbolization::SymbolizeMode;

/// A profile produced by a fetcher, with the canonical source it came from
///
/// `source` is empty for local files, which marks the profile as not
/// remote.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub profile: Profile,
    pub source: String,
}

/// Caller-supplied fetch override
pub trait ProfileFetcher: Send + Sync {
    /// Fetch `source`. `Ok(None)` hands the source to the built-in
    /// resolver.
    ///
    /// # Errors
    /// An error also falls back to the built-in resolver.
    fn fetch(&self, source: &str, duration: Duration, timeout: Duration)
        -> FetchResult<Option<Fetched>>;
}

/// An opened object file
pub trait ObjFile {
    fn name(&self) -> &str;
    /// Hex-encoded build id, empty when the file carries none.
    fn build_id(&self) -> &str;
}

/// Opens candidate binaries for the binary locator
pub trait ObjTool: Send + Sync {
    /// Open the binary at `path` as mapped at `[start, limit)` with file
    /// offset `offset`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not an object file.
    fn open(&self, path: &Path, start: u64, limit: u64, offset: u64) -> Result<Box<dyn ObjFile>>;
}

/// Sink for user-facing messages
pub trait Ui: Send + Sync {
    fn print(&self, msg: &str);
    fn print_err(&self, msg: &str);
}

/// Attaches function names to the aggregate profile
pub trait Symbolize {
    /// # Errors
    /// Returns an error if symbolization cannot proceed at all. Failures for
    /// individual mappings are logged instead.
    fn symbolize(
        &self,
        mode: SymbolizeMode,
        sources: &MappingSources,
        profile: &mut Profile,
    ) -> Result<()>;
}

/// Terminal UI: status lines to stdout, warnings to stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleUi {
    quiet: bool,
}

impl ConsoleUi {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Ui for ConsoleUi {
    fn print(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    fn print_err(&self, msg: &str) {
        eprintln!("{msg}");
    }
}

/// [`ObjTool`] for ELF and other formats understood by the `object` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfObjTool;

struct ParsedObjFile {
    name: String,
    build_id: String,
}

impl ObjFile for ParsedObjFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_id(&self) -> &str {
        &self.build_id
    }
}

impl ObjTool for ElfObjTool {
    fn open(
        &self,
        path: &Path,
        _start: u64,
        _limit: u64,
        _offset: u64,
    ) -> Result<Box<dyn ObjFile>> {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let obj = object::File::parse(&*data)
            .with_context(|| format!("Failed to parse object file {}", path.display()))?;
        let build_id = obj.build_id().ok().flatten().map(hex::encode).unwrap_or_default();
        Ok(Box::new(ParsedObjFile { name: path.to_string_lossy().into_owned(), build_id }))
    }
}
