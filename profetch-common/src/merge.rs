//! Profile merging
//!
//! Merging deduplicates mappings, functions, locations and samples across the
//! source profiles and sums the values of identical samples. All sources must
//! share the same sample types and period type; see [`Profile::compatible`].

use std::collections::HashMap;

use crate::error::{ProfileError, ProfileResult};
use crate::profile::{Function, Label, Line, Location, Mapping, Profile, Sample};

/// Mapping sizes are rounded up to this boundary before comparison.
const MAPSIZE_ROUNDING: u64 = 0x1000;

/// Merge `srcs` into a single profile.
///
/// The first mapping of the first profile that has mappings stays first in
/// the result, since consumers treat mapping zero as the main binary.
///
/// # Errors
/// Returns an error if `srcs` is empty, the profiles are not compatible, or
/// a profile references ids it does not define.
pub fn merge(srcs: &[Profile]) -> ProfileResult<Profile> {
    let Some(first) = srcs.first() else {
        return Err(ProfileError::Empty);
    };
    for src in &srcs[1..] {
        first.compatible(src)?;
    }

    let mut merger = Merger::new(combine_headers(srcs));
    for src in srcs {
        merger.merge_source(src)?;
    }

    let merged = merger.out;
    if merged.sample.iter().any(is_zero_sample) {
        // Values cancelled out; merge again to drop the zero samples and
        // anything only they referenced.
        return merge(std::slice::from_ref(&merged));
    }
    Ok(merged)
}

fn combine_headers(srcs: &[Profile]) -> Profile {
    let first = &srcs[0];
    let mut out = Profile {
        sample_type: first.sample_type.clone(),
        default_sample_type: first.default_sample_type.clone(),
        period_type: first.period_type.clone(),
        ..Default::default()
    };
    for s in srcs {
        if out.time_nanos == 0 || s.time_nanos < out.time_nanos {
            out.time_nanos = s.time_nanos;
        }
        out.duration_nanos += s.duration_nanos;
        if out.period == 0 || out.period < s.period {
            out.period = s.period;
        }
        for c in &s.comments {
            if !out.comments.contains(c) {
                out.comments.push(c.clone());
            }
        }
        if out.drop_frames.is_empty() {
            out.drop_frames.clone_from(&s.drop_frames);
        }
        if out.keep_frames.is_empty() {
            out.keep_frames.clone_from(&s.keep_frames);
        }
    }
    out
}

fn is_zero_sample(s: &Sample) -> bool {
    s.value.iter().all(|&v| v == 0)
}

#[derive(PartialEq, Eq, Hash)]
struct MappingKey {
    size: u64,
    offset: u64,
    build_id_or_file: String,
}

impl MappingKey {
    fn of(m: &Mapping) -> Self {
        let size = m.limit.wrapping_sub(m.start);
        let size = size.saturating_add(MAPSIZE_ROUNDING - 1);
        let size = size - (size % MAPSIZE_ROUNDING);
        // Mappings with neither build id nor file are fake mappings and all
        // share the empty key.
        let build_id_or_file =
            if m.build_id.is_empty() { m.file.clone() } else { m.build_id.clone() };
        Self { size, offset: m.offset, build_id_or_file }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct FunctionKey {
    start_line: i64,
    name: String,
    system_name: String,
    filename: String,
}

#[derive(PartialEq, Eq, Hash)]
struct LocationKey {
    addr: u64,
    mapping_id: u64,
    lines: Vec<(u64, i64, i64)>,
    is_folded: bool,
}

#[derive(PartialEq, Eq, Hash)]
struct SampleKey {
    location: Vec<u64>,
    labels: Vec<Label>,
}

/// A source mapping translated into the merged profile.
#[derive(Clone, Copy)]
struct MapInfo {
    id: u64,
    /// Added to source addresses to move them into the merged mapping.
    offset: i64,
}

/// Id lookups over one source profile.
struct SourceIndex<'a> {
    mappings: HashMap<u64, &'a Mapping>,
    locations: HashMap<u64, &'a Location>,
    functions: HashMap<u64, &'a Function>,
}

impl<'a> SourceIndex<'a> {
    fn new(p: &'a Profile) -> Self {
        Self {
            mappings: p.mapping.iter().map(|m| (m.id, m)).collect(),
            locations: p.location.iter().map(|l| (l.id, l)).collect(),
            functions: p.function.iter().map(|f| (f.id, f)).collect(),
        }
    }
}

struct Merger {
    out: Profile,
    samples: HashMap<SampleKey, usize>,
    locations: HashMap<LocationKey, u64>,
    functions: HashMap<FunctionKey, u64>,
    mappings: HashMap<MappingKey, u64>,

    // Reset for every source profile.
    locations_by_id: HashMap<u64, u64>,
    functions_by_id: HashMap<u64, u64>,
    mappings_by_id: HashMap<u64, MapInfo>,
}

impl Merger {
    fn new(out: Profile) -> Self {
        Self {
            out,
            samples: HashMap::new(),
            locations: HashMap::new(),
            functions: HashMap::new(),
            mappings: HashMap::new(),
            locations_by_id: HashMap::new(),
            functions_by_id: HashMap::new(),
            mappings_by_id: HashMap::new(),
        }
    }

    fn merge_source(&mut self, src: &Profile) -> ProfileResult<()> {
        self.locations_by_id.clear();
        self.functions_by_id.clear();
        self.mappings_by_id.clear();

        if self.out.mapping.is_empty() {
            if let Some(main) = src.mapping.first() {
                self.map_mapping(main);
            }
        }

        let index = SourceIndex::new(src);
        for s in &src.sample {
            if !is_zero_sample(s) {
                self.map_sample(&index, s)?;
            }
        }
        Ok(())
    }

    fn map_sample(&mut self, index: &SourceIndex<'_>, src: &Sample) -> ProfileResult<()> {
        let mut location = Vec::with_capacity(src.location.len());
        for id in &src.location {
            let l = index
                .locations
                .get(id)
                .ok_or_else(|| ProfileError::Malformed(format!("unknown location id {id}")))?;
            location.push(self.map_location(index, l)?);
        }

        let mut labels = src.label.clone();
        labels.sort();
        let key = SampleKey { location, labels };

        if let Some(&idx) = self.samples.get(&key) {
            let existing = &mut self.out.sample[idx];
            for (acc, v) in existing.value.iter_mut().zip(&src.value) {
                *acc += v;
            }
            return Ok(());
        }

        self.out.sample.push(Sample {
            location: key.location.clone(),
            value: src.value.clone(),
            label: src.label.clone(),
        });
        self.samples.insert(key, self.out.sample.len() - 1);
        Ok(())
    }

    fn map_location(&mut self, index: &SourceIndex<'_>, src: &Location) -> ProfileResult<u64> {
        if let Some(&id) = self.locations_by_id.get(&src.id) {
            return Ok(id);
        }

        let mut mapping_id = 0;
        let mut address = src.address;
        let mut mapping_start = 0;
        if src.mapping_id != 0 {
            let m = index.mappings.get(&src.mapping_id).ok_or_else(|| {
                ProfileError::Malformed(format!("unknown mapping id {}", src.mapping_id))
            })?;
            let mi = self.map_mapping(m);
            mapping_id = mi.id;
            address = src.address.wrapping_add_signed(mi.offset);
            mapping_start = self.out.mapping[index_of(mi.id)].start;
        }

        let mut line = Vec::with_capacity(src.line.len());
        for ln in &src.line {
            let f = index.functions.get(&ln.function_id).ok_or_else(|| {
                ProfileError::Malformed(format!("unknown function id {}", ln.function_id))
            })?;
            line.push(Line { function_id: self.map_function(f), line: ln.line, column: ln.column });
        }

        let key = LocationKey {
            addr: address.wrapping_sub(mapping_start),
            mapping_id,
            lines: line.iter().map(|l| (l.function_id, l.line, l.column)).collect(),
            is_folded: src.is_folded,
        };
        if let Some(&id) = self.locations.get(&key) {
            self.locations_by_id.insert(src.id, id);
            return Ok(id);
        }

        let id = next_id(self.out.location.len());
        self.out.location.push(Location { id, mapping_id, address, line, is_folded: src.is_folded });
        self.locations.insert(key, id);
        self.locations_by_id.insert(src.id, id);
        Ok(id)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn map_mapping(&mut self, src: &Mapping) -> MapInfo {
        if let Some(&mi) = self.mappings_by_id.get(&src.id) {
            return mi;
        }

        let key = MappingKey::of(src);
        if let Some(&id) = self.mappings.get(&key) {
            let existing = &self.out.mapping[index_of(id)];
            let mi = MapInfo { id, offset: existing.start.wrapping_sub(src.start) as i64 };
            self.mappings_by_id.insert(src.id, mi);
            return mi;
        }

        let id = next_id(self.out.mapping.len());
        self.out.mapping.push(Mapping { id, ..src.clone() });
        self.mappings.insert(key, id);
        let mi = MapInfo { id, offset: 0 };
        self.mappings_by_id.insert(src.id, mi);
        mi
    }

    fn map_function(&mut self, src: &Function) -> u64 {
        if let Some(&id) = self.functions_by_id.get(&src.id) {
            return id;
        }

        let key = FunctionKey {
            start_line: src.start_line,
            name: src.name.clone(),
            system_name: src.system_name.clone(),
            filename: src.filename.clone(),
        };
        if let Some(&id) = self.functions.get(&key) {
            self.functions_by_id.insert(src.id, id);
            return id;
        }

        let id = next_id(self.out.function.len());
        self.out.function.push(Function { id, ..src.clone() });
        self.functions.insert(key, id);
        self.functions_by_id.insert(src.id, id);
        id
    }
}

fn next_id(len: usize) -> u64 {
    len as u64 + 1
}

#[allow(clippy::cast_possible_truncation)]
fn index_of(id: u64) -> usize {
    (id - 1) as usize
}
