//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{SourceConfig, DEFAULT_PERF_CONVERTER};
use crate::symbolization::SymbolizeMode;

#[derive(Parser)]
#[command(
    name = "profetch",
    about = "Fetch, merge and symbolize profiles from servers and files",
    after_help = "\
EXAMPLES:
    profetch --seconds 30 localhost:6060/debug/pprof/profile -o cpu.pb.gz
    profetch host1:6060/debug/pprof/heap host2:6060/debug/pprof/heap
    profetch after.pb.gz --base before.pb.gz -o diff.pb.gz"
)]
pub struct Args {
    /// Profile sources: URLs, host:port/path, profile files or perf captures
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<String>,

    /// Source to subtract from the result (repeatable)
    #[arg(long, value_name = "SOURCE")]
    pub base: Vec<String>,

    /// Profiling duration requested from servers (0 = server default)
    #[arg(long, default_value = "0")]
    pub seconds: u64,

    /// Fetch timeout in seconds (0 = derived from --seconds)
    #[arg(long, default_value = "0")]
    pub timeout: u64,

    /// Path of the main binary, replacing the one recorded in the profile
    #[arg(long, value_name = "PATH")]
    pub exec: Option<String>,

    /// Build id of the main binary, replacing the one recorded in the profile
    #[arg(long = "buildid", value_name = "ID")]
    pub build_id: Option<String>,

    /// How to attach function names
    #[arg(long, value_enum, default_value_t = SymbolizeMode::Auto)]
    pub symbolize: SymbolizeMode,

    /// Command converting perf captures, invoked as `<cmd> <input> <output>`
    #[arg(long, value_name = "CMD", default_value = DEFAULT_PERF_CONVERTER)]
    pub perf_converter: PathBuf,

    /// Write the merged profile to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            sources: self.sources.clone(),
            base: self.base.clone(),
            duration: Duration::from_secs(self.seconds),
            timeout: Duration::from_secs(self.timeout),
            exec_name: self.exec.clone(),
            build_id: self.build_id.clone(),
            symbolize: self.symbolize,
            perf_converter: self.perf_converter.clone(),
        }
    }
}
