use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, warn};
use object::{Object, ObjectKind, ObjectSection};
use profetch_common::{Line, Mapping, Profile};
use rustc_demangle::demangle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

const UNKNOWN_FUNCTION: &str = "<unknown>";

/// Symbolizer for resolving addresses in one binary to source locations
///
/// Includes a cache to avoid re-resolving the same addresses repeatedly,
/// which matters when many locations of a profile share a few hot addresses.
pub struct DwarfSymbolizer {
    ctx: Context<EndianRcSlice<RunTimeEndian>>,
    /// Position independent binaries need runtime addresses translated to
    /// file-relative ones.
    relocatable: bool,
    /// Cache of resolved frames by address
    cache: RefCell<HashMap<u64, ResolvedFrame>>,
}

impl DwarfSymbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed, or if DWARF debug info is missing
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;

        let obj_file = object::File::parse(&*binary_data).context("Failed to parse object file")?;
        let relocatable = obj_file.kind() == ObjectKind::Dynamic;

        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        Ok(Self { ctx, relocatable, cache: RefCell::new(HashMap::new()) })
    }

    /// Translate a profiled address into the binary's own address space.
    #[must_use]
    pub fn object_address(&self, addr: u64, m: &Mapping) -> u64 {
        if self.relocatable {
            addr.wrapping_sub(m.start).wrapping_add(m.offset)
        } else {
            addr
        }
    }

    /// Resolve an address to source location information
    ///
    /// Uses a cache to avoid re-resolving the same address multiple times.
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();

        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame
                    .function
                    .and_then(|f| f.demangle().ok().map(|s| s.to_string()))
                    .unwrap_or_else(|| UNKNOWN_FUNCTION.to_string());

                let location = frame.location.map(|loc| SourceLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                result.push(InlinedFrame { function, location });
            }
        }

        let resolved = ResolvedFrame {
            addr,
            frames: if result.is_empty() {
                vec![InlinedFrame { function: UNKNOWN_FUNCTION.to_string(), location: None }]
            } else {
                result
            },
        };

        self.cache.borrow_mut().insert(addr, resolved.clone());

        resolved
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved address (may contain multiple inlined frames)
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ResolvedFrame {
    /// True when at least one frame resolved to a function name.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.frames.iter().any(|f| f.function != UNKNOWN_FUNCTION)
    }
}

/// Symbolize every unsymbolized mapping whose file exists locally.
///
/// Returns the number of locations that gained line information. Mappings
/// whose binary cannot be loaded are skipped with a warning.
pub fn symbolize_local(p: &mut Profile) -> usize {
    let mut symbolized = 0;
    for mi in 0..p.mapping.len() {
        let m = p.mapping[mi].clone();
        if m.has_functions || m.file.is_empty() || !Path::new(&m.file).is_file() {
            continue;
        }
        let symbolizer = match DwarfSymbolizer::new(&m.file) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping local symbolization of {}: {e:#}", m.file);
                continue;
            }
        };

        // addr2line yields innermost frames first, matching the order of
        // Location.line.
        let resolved: Vec<(usize, ResolvedFrame)> = p
            .location
            .iter()
            .enumerate()
            .filter(|(_, loc)| loc.mapping_id == m.id && loc.line.is_empty())
            .map(|(li, loc)| (li, symbolizer.resolve(symbolizer.object_address(loc.address, &m))))
            .filter(|(_, frame)| frame.is_known())
            .collect();

        let count = resolved.len();
        for (li, frame) in resolved {
            let lines = frame
                .frames
                .iter()
                .map(|inlined| {
                    let file = inlined
                        .location
                        .as_ref()
                        .and_then(|l| l.file.as_deref())
                        .unwrap_or_default();
                    let function_id =
                        p.intern_function(&inlined.function, &inlined.function, file);
                    let loc = inlined.location.as_ref();
                    Line {
                        function_id,
                        line: loc.and_then(|l| l.line).map_or(0, i64::from),
                        column: loc.and_then(|l| l.column).map_or(0, i64::from),
                    }
                })
                .collect();
            p.location[li].line = lines;
        }

        let mapping = &mut p.mapping[mi];
        mapping.has_functions = true;
        mapping.has_filenames = true;
        mapping.has_line_numbers = true;
        mapping.has_inline_frames = true;
        debug!("Symbolized {count} locations of {}", m.file);
        symbolized += count;
    }
    symbolized
}
