//! Fetch configuration
//!
//! [`SourceConfig`] carries the per-invocation options normally built from
//! the command line. [`FetchEnv`] snapshots the environment variables the
//! engine consults so the rest of the code never reads the process
//! environment directly.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::FetchTask;
use crate::symbolization::SymbolizeMode;

/// Converter invoked as `<converter> <input> <output>` for perf captures.
pub const DEFAULT_PERF_CONVERTER: &str = "perf_to_profile";

/// Overrides the directory fetched profiles are saved to.
pub const ENV_TMP_DIR: &str = "PPROF_TMPDIR";
/// List of directories searched for local copies of profiled binaries.
pub const ENV_BINARY_PATH: &str = "PPROF_BINARY_PATH";

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Numerator sources, fetched with scale `+1`.
    pub sources: Vec<String>,
    /// Base sources, fetched with scale `-1`.
    pub base: Vec<String>,
    /// Profiling duration requested from remote servers. Zero keeps the
    /// server's default.
    pub duration: Duration,
    /// Fetch timeout. Zero derives it from `duration`.
    pub timeout: Duration,
    /// Replaces the file name of the first mapping of every fetched profile.
    pub exec_name: Option<String>,
    /// Replaces the build id of the first mapping of every fetched profile.
    pub build_id: Option<String>,
    pub symbolize: SymbolizeMode,
    pub perf_converter: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            base: Vec::new(),
            duration: Duration::ZERO,
            timeout: Duration::ZERO,
            exec_name: None,
            build_id: None,
            symbolize: SymbolizeMode::default(),
            perf_converter: PathBuf::from(DEFAULT_PERF_CONVERTER),
        }
    }
}

impl SourceConfig {
    /// Numerator tasks followed by base tasks, in command-line order.
    #[must_use]
    pub fn tasks(&self) -> Vec<FetchTask> {
        self.sources
            .iter()
            .map(|s| FetchTask::numerator(s))
            .chain(self.base.iter().map(|s| FetchTask::base(s)))
            .collect()
    }
}

/// Environment consulted by the engine, read once at startup
#[derive(Debug, Clone, Default)]
pub struct FetchEnv {
    pub tmp_dir: Option<PathBuf>,
    pub binary_path: Option<OsString>,
    pub home: Option<PathBuf>,
}

impl FetchEnv {
    /// Snapshot `PPROF_TMPDIR`, `PPROF_BINARY_PATH` and `HOME`. Empty values
    /// count as unset.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| env::var_os(name).filter(|v| !v.is_empty());
        Self {
            tmp_dir: var(ENV_TMP_DIR).map(PathBuf::from),
            binary_path: var(ENV_BINARY_PATH),
            home: var("HOME").map(PathBuf::from),
        }
    }

    /// Directories searched for local binaries, in priority order.
    ///
    /// Defaults to `$HOME/pprof/binaries` when `PPROF_BINARY_PATH` is unset.
    #[must_use]
    pub fn binary_search_path(&self) -> Vec<PathBuf> {
        match &self.binary_path {
            Some(paths) => env::split_paths(paths).filter(|p| !p.as_os_str().is_empty()).collect(),
            None => self.home.iter().map(|h| h.join("pprof").join("binaries")).collect(),
        }
    }
}
