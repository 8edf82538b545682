//! # profetch - Main Entry Point
//!
//! Fetches every source given on the command line, merges them and either
//! writes the aggregate to `--output` or prints a summary of it.

use anyhow::{Context, Result};
use clap::Parser;
use profetch::cli::Args;
use profetch::plugin::{ConsoleUi, ElfObjTool, Ui};
use profetch::symbolization::Symbolizer;
use profetch::{fetch_profiles, FetchEnv, Options};
use std::fs::File;
use std::io::BufWriter;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.source_config();
    let env = FetchEnv::from_env();

    let ui = ConsoleUi::new(args.quiet);
    let obj = ElfObjTool;
    let sym = Symbolizer::default();
    let options = Options { fetcher: None, obj: &obj, ui: &ui, sym: &sym };

    let profile = fetch_profiles(&config, &env, &options).context("Failed to fetch profiles")?;

    let types: Vec<String> = profile.sample_type.iter().map(ToString::to_string).collect();
    ui.print(&format!(
        "{} samples, {} mappings, {} locations, {} functions [{}]",
        profile.sample.len(),
        profile.mapping.len(),
        profile.location.len(),
        profile.function.len(),
        types.join(" ")
    ));

    if let Some(path) = &args.output {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        profile.write(BufWriter::new(file)).context("Failed to write profile")?;
        ui.print(&format!("saved: {}", path.display()));
    }

    Ok(())
}
