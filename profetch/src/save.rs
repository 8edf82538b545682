//! Saving fetched profiles to disk
//!
//! Remote profiles are kept as `pprof.<binary>.<types>.NNN.pb.gz` so they can
//! be inspected again without re-fetching.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use log::debug;
use profetch_common::Profile;

use crate::config::FetchEnv;
use crate::domain::{FetchError, FetchResult};
use crate::plugin::Ui;

const MAX_TEMP_FILES: u32 = 10_000;

/// Directory fetched profiles are saved in.
///
/// `PPROF_TMPDIR` is used as given. Otherwise `$HOME/pprof` is created if
/// needed, falling back to the system temp directory. Unusable candidates
/// are reported to `ui`.
///
/// # Errors
/// Returns an error if no candidate directory is usable.
pub fn set_tmp_dir(env: &FetchEnv, ui: &dyn Ui) -> FetchResult<PathBuf> {
    if let Some(dir) = &env.tmp_dir {
        return Ok(dir.clone());
    }
    let candidates = env.home.iter().map(|h| h.join("pprof")).chain([std::env::temp_dir()]);
    for dir in candidates {
        match fs::create_dir_all(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) => ui.print_err(&format!("Could not use temp dir {}: {e}", dir.display())),
        }
    }
    Err(FetchError::NoTempDir)
}

/// Create `<dir>/<prefix>NNN<suffix>` for the lowest free index starting at
/// `001`.
///
/// # Errors
/// Returns an error if the file cannot be created for a reason other than
/// the name being taken, or all indices are taken.
pub fn new_temp_file(dir: &Path, prefix: &str, suffix: &str) -> io::Result<(File, PathBuf)> {
    for index in 1..MAX_TEMP_FILES {
        let path = dir.join(format!("{prefix}{index:03}{suffix}"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => return Ok((f, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("could not create file of the form {prefix}NNN{suffix}"),
    ))
}

/// File name prefix for a saved profile, e.g. `pprof.server.samples.cpu.`.
#[must_use]
pub fn save_prefix(p: &Profile) -> String {
    let mut prefix = String::from("pprof.");
    if let Some(name) = p
        .mapping
        .first()
        .and_then(|m| Path::new(&m.file).file_name())
        .and_then(|n| n.to_str())
    {
        prefix.push_str(name);
        prefix.push('.');
    }
    for st in &p.sample_type {
        prefix.push_str(&st.ty);
        prefix.push('.');
    }
    prefix
}

/// Save `p` gzip-compressed into the save directory.
///
/// # Errors
/// Returns an error if no directory is usable or the file cannot be
/// written.
pub fn save_profile(p: &Profile, env: &FetchEnv, ui: &dyn Ui) -> FetchResult<PathBuf> {
    let dir = set_tmp_dir(env, ui)?;
    let (file, path) = new_temp_file(&dir, &save_prefix(p), ".pb.gz")?;
    if let Err(e) = p.write(BufWriter::new(file)) {
        // Don't leave a truncated profile behind.
        let _ = fs::remove_file(&path);
        return Err(e.into());
    }
    debug!("Wrote {}", path.display());
    Ok(path)
}
