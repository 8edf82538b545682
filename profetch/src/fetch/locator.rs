//! Local binary lookup
//!
//! Points each mapping of a fetched profile at a local copy of its binary
//! when one can be found on the search path. For every search directory the
//! candidates are tried in order:
//!
//! ```text
//! <dir>/<build-id>/<base-name>
//! <dir>/<build-id>/*
//! <dir>/<base-name>
//! ```
//!
//! A candidate is accepted only if it opens and, when the mapping has a
//! build id, reports the same one.

use std::path::{Path, PathBuf};

use log::{debug, info};
use profetch_common::{Mapping, Profile};

use crate::plugin::{ObjTool, Ui};

/// Replacement identity for the first mapping of every fetched profile
#[derive(Debug, Clone, Copy, Default)]
pub struct MainBinary<'a> {
    pub exec_name: Option<&'a str>,
    pub build_id: Option<&'a str>,
}

fn candidates(dir: &Path, build_id: &str, base_name: Option<&str>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if !build_id.is_empty() {
        let id_dir = dir.join(build_id);
        if let Some(base) = base_name {
            out.push(id_dir.join(base));
        }
        let pattern = format!("{}/*", glob::Pattern::escape(&id_dir.to_string_lossy()));
        if let Ok(paths) = glob::glob(&pattern) {
            out.extend(paths.flatten());
        }
    }
    if let Some(base) = base_name {
        out.push(dir.join(base));
    }
    out
}

fn find_binary(
    m: &Mapping,
    search_path: &[PathBuf],
    obj: &dyn ObjTool,
    ui: &dyn Ui,
) -> Option<String> {
    let base_name = Path::new(&m.file).file_name().and_then(|n| n.to_str());

    for dir in search_path {
        for candidate in candidates(dir, &m.build_id, base_name) {
            let Ok(file) = obj.open(&candidate, m.start, m.limit, m.offset) else {
                continue;
            };
            if m.build_id.is_empty() || m.build_id == file.build_id() {
                return Some(file.name().to_string());
            }
            ui.print_err(&format!(
                "Ignoring local file {}: build-id mismatch ({} != {})",
                file.name(),
                m.build_id,
                file.build_id()
            ));
        }
    }
    None
}

/// Apply the main binary overrides and point mappings at local binaries.
///
/// Mappings with no local copy are left unchanged.
pub fn locate_binaries(
    p: &mut Profile,
    main: MainBinary<'_>,
    search_path: &[PathBuf],
    obj: &dyn ObjTool,
    ui: &dyn Ui,
) {
    for (i, m) in p.mapping.iter_mut().enumerate() {
        if i == 0 {
            if let Some(name) = main.exec_name {
                m.file = name.to_string();
            }
            if let Some(id) = main.build_id {
                m.build_id = id.to_string();
            }
        }
        if m.file.is_empty() && m.build_id.is_empty() {
            continue;
        }
        match find_binary(m, search_path, obj, ui) {
            Some(found) => {
                info!("Using local binary {found} for {}", m.file);
                m.file = found;
            }
            None => debug!("No local binary for {} [{}]", m.file, m.build_id),
        }
    }
}
