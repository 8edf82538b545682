//! Sampled profile model
//!
//! [`Profile`] is the decoded, string-resolved form of a pprof message.
//! Cross references between samples, locations, mappings and functions are
//! kept as ids, exactly as on the wire, so a profile can be decoded, edited
//! and encoded again without re-linking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use crate::error::{ProfileError, ProfileResult};
use crate::proto;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Semantics and unit of a sample value, e.g. `cpu/nanoseconds`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ValueType {
    pub ty: String,
    pub unit: String,
}

impl ValueType {
    #[must_use]
    pub fn new(ty: &str, unit: &str) -> Self {
        Self { ty: ty.to_string(), unit: unit.to_string() }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ty, self.unit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub key: String,
    pub str: String,
    pub num: i64,
    pub num_unit: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Location ids, leaf first.
    pub location: Vec<u64>,
    pub value: Vec<i64>,
    pub label: Vec<Label>,
}

/// An address range of the profiled process backed by a binary image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    pub id: u64,
    pub start: u64,
    pub limit: u64,
    pub offset: u64,
    pub file: String,
    pub build_id: String,
    pub has_functions: bool,
    pub has_filenames: bool,
    pub has_line_numbers: bool,
    pub has_inline_frames: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub id: u64,
    /// Zero when the location is not backed by a mapping.
    pub mapping_id: u64,
    pub address: u64,
    /// Innermost inlined frame first.
    pub line: Vec<Line>,
    pub is_folded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub id: u64,
    pub name: String,
    pub system_name: String,
    pub filename: String,
    pub start_line: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub sample_type: Vec<ValueType>,
    pub default_sample_type: String,
    pub sample: Vec<Sample>,
    pub mapping: Vec<Mapping>,
    pub location: Vec<Location>,
    pub function: Vec<Function>,
    pub comments: Vec<String>,
    pub drop_frames: String,
    pub keep_frames: String,
    pub time_nanos: i64,
    pub duration_nanos: i64,
    pub period_type: Option<ValueType>,
    pub period: i64,
}

impl Profile {
    /// Parse a serialized profile, gzip-compressed or not.
    ///
    /// # Errors
    /// Returns an error if the data is empty, cannot be decompressed or
    /// decoded, or references strings outside the string table.
    pub fn parse(data: &[u8]) -> ProfileResult<Self> {
        if data.is_empty() {
            return Err(ProfileError::Malformed("empty input file".to_string()));
        }
        let decompressed;
        let raw = if data.starts_with(&GZIP_MAGIC) {
            let mut out = Vec::new();
            GzDecoder::new(data).read_to_end(&mut out)?;
            decompressed = out;
            decompressed.as_slice()
        } else {
            data
        };
        let wire = proto::Profile::decode(raw)?;
        Self::from_wire(&wire)
    }

    /// Serialize as gzip-compressed pprof.
    ///
    /// # Errors
    /// Returns an error if writing to `w` fails.
    pub fn write<W: Write>(&self, w: W) -> ProfileResult<()> {
        let mut encoder = GzEncoder::new(w, Compression::default());
        encoder.write_all(&self.to_wire().encode_to_vec())?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    /// Serialize as uncompressed pprof bytes.
    #[must_use]
    pub fn encode_uncompressed(&self) -> Vec<u8> {
        self.to_wire().encode_to_vec()
    }

    /// Check internal consistency: value counts and id references.
    ///
    /// # Errors
    /// Returns [`ProfileError::Invalid`] describing the first problem found.
    pub fn check_valid(&self) -> ProfileResult<()> {
        let invalid = |msg: String| Err(ProfileError::Invalid(msg));

        let sample_len = self.sample_type.len();
        if sample_len == 0 && !self.sample.is_empty() {
            return invalid("missing sample type information".to_string());
        }
        for s in &self.sample {
            if s.value.len() != sample_len {
                return invalid(format!(
                    "mismatch: sample has {} values vs. {} types",
                    s.value.len(),
                    sample_len
                ));
            }
        }

        let mut mappings = HashSet::with_capacity(self.mapping.len());
        for m in &self.mapping {
            if m.id == 0 {
                return invalid("found mapping with reserved ID=0".to_string());
            }
            if !mappings.insert(m.id) {
                return invalid(format!("multiple mappings with same id: {}", m.id));
            }
        }

        let mut functions = HashSet::with_capacity(self.function.len());
        for f in &self.function {
            if f.id == 0 {
                return invalid("found function with reserved ID=0".to_string());
            }
            if !functions.insert(f.id) {
                return invalid(format!("multiple functions with same id: {}", f.id));
            }
        }

        let mut locations = HashSet::with_capacity(self.location.len());
        for l in &self.location {
            if l.id == 0 {
                return invalid("found location with reserved id=0".to_string());
            }
            if !locations.insert(l.id) {
                return invalid(format!("multiple locations with same id: {}", l.id));
            }
            if l.mapping_id != 0 && !mappings.contains(&l.mapping_id) {
                return invalid(format!(
                    "location id: {} has unknown mapping id: {}",
                    l.id, l.mapping_id
                ));
            }
            for ln in &l.line {
                if !functions.contains(&ln.function_id) {
                    return invalid(format!(
                        "location id: {} has unknown function id: {}",
                        l.id, ln.function_id
                    ));
                }
            }
        }

        for s in &self.sample {
            if let Some(id) = s.location.iter().find(|id| !locations.contains(id)) {
                return invalid(format!("sample references unknown location id: {id}"));
            }
        }
        Ok(())
    }

    /// Multiply every sample value by `ratio`.
    pub fn scale(&mut self, ratio: f64) {
        if (ratio - 1.0).abs() < f64::EPSILON {
            return;
        }
        let ratios = vec![ratio; self.sample_type.len()];
        // Lengths match by construction.
        let _ = self.scale_n(&ratios);
    }

    /// Multiply each sample value by the ratio of its sample type.
    ///
    /// Samples left without any non-zero scaled value are dropped.
    ///
    /// # Errors
    /// Returns an error if `ratios` does not have one entry per sample type.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn scale_n(&mut self, ratios: &[f64]) -> ProfileResult<()> {
        if self.sample_type.len() != ratios.len() {
            return Err(ProfileError::Invalid(format!(
                "mismatched scale ratios, got {}, want {}",
                ratios.len(),
                self.sample_type.len()
            )));
        }
        if ratios.iter().all(|r| (r - 1.0).abs() < f64::EPSILON) {
            return Ok(());
        }
        self.sample.retain_mut(|s| {
            let mut keep = false;
            for (v, r) in s.value.iter_mut().zip(ratios) {
                if (r - 1.0).abs() >= f64::EPSILON {
                    *v = (*v as f64 * r).round() as i64;
                    keep = keep || *v != 0;
                }
            }
            keep
        });
        Ok(())
    }

    /// Whether `other` can be merged into this profile.
    ///
    /// # Errors
    /// Returns [`ProfileError::Incompatible`] naming the differing types.
    pub fn compatible(&self, other: &Profile) -> ProfileResult<()> {
        if self.period_type != other.period_type {
            return Err(ProfileError::Incompatible(format!(
                "incompatible period types {} and {}",
                display_opt(self.period_type.as_ref()),
                display_opt(other.period_type.as_ref())
            )));
        }
        if self.sample_type != other.sample_type {
            return Err(ProfileError::Incompatible(format!(
                "incompatible sample types [{}] and [{}]",
                join_types(&self.sample_type),
                join_types(&other.sample_type)
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn function(&self, id: u64) -> Option<&Function> {
        self.function.iter().find(|f| f.id == id)
    }

    /// Return the id of a function with these attributes, adding it if needed.
    pub fn intern_function(&mut self, name: &str, system_name: &str, filename: &str) -> u64 {
        if let Some(f) = self
            .function
            .iter()
            .find(|f| f.name == name && f.system_name == system_name && f.filename == filename)
        {
            return f.id;
        }
        let id = self.function.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        self.function.push(Function {
            id,
            name: name.to_string(),
            system_name: system_name.to_string(),
            filename: filename.to_string(),
            start_line: 0,
        });
        id
    }

    fn from_wire(wire: &proto::Profile) -> ProfileResult<Self> {
        let strings = StringLookup::new(&wire.string_table)?;
        let value_type = |vt: &proto::ValueType| -> ProfileResult<ValueType> {
            Ok(ValueType { ty: strings.get(vt.r#type)?, unit: strings.get(vt.unit)? })
        };

        let sample_type = wire.sample_type.iter().map(value_type).collect::<ProfileResult<_>>()?;

        let mut sample = Vec::with_capacity(wire.sample.len());
        for s in &wire.sample {
            let label = s
                .label
                .iter()
                .map(|l| {
                    Ok(Label {
                        key: strings.get(l.key)?,
                        str: strings.get(l.str)?,
                        num: l.num,
                        num_unit: strings.get(l.num_unit)?,
                    })
                })
                .collect::<ProfileResult<_>>()?;
            sample.push(Sample { location: s.location_id.clone(), value: s.value.clone(), label });
        }

        let mut mapping = Vec::with_capacity(wire.mapping.len());
        for m in &wire.mapping {
            mapping.push(Mapping {
                id: m.id,
                start: m.memory_start,
                limit: m.memory_limit,
                offset: m.file_offset,
                file: strings.get(m.filename)?,
                build_id: strings.get(m.build_id)?,
                has_functions: m.has_functions,
                has_filenames: m.has_filenames,
                has_line_numbers: m.has_line_numbers,
                has_inline_frames: m.has_inline_frames,
            });
        }

        let location = wire
            .location
            .iter()
            .map(|l| Location {
                id: l.id,
                mapping_id: l.mapping_id,
                address: l.address,
                line: l
                    .line
                    .iter()
                    .map(|ln| Line { function_id: ln.function_id, line: ln.line, column: ln.column })
                    .collect(),
                is_folded: l.is_folded,
            })
            .collect();

        let mut function = Vec::with_capacity(wire.function.len());
        for f in &wire.function {
            function.push(Function {
                id: f.id,
                name: strings.get(f.name)?,
                system_name: strings.get(f.system_name)?,
                filename: strings.get(f.filename)?,
                start_line: f.start_line,
            });
        }

        Ok(Self {
            sample_type,
            default_sample_type: strings.get(wire.default_sample_type)?,
            sample,
            mapping,
            location,
            function,
            comments: wire.comment.iter().map(|&c| strings.get(c)).collect::<ProfileResult<_>>()?,
            drop_frames: strings.get(wire.drop_frames)?,
            keep_frames: strings.get(wire.keep_frames)?,
            time_nanos: wire.time_nanos,
            duration_nanos: wire.duration_nanos,
            period_type: wire.period_type.as_ref().map(value_type).transpose()?,
            period: wire.period,
        })
    }

    fn to_wire(&self) -> proto::Profile {
        let mut st = StringTable::default();
        let value_type = |st: &mut StringTable, vt: &ValueType| proto::ValueType {
            r#type: st.intern(&vt.ty),
            unit: st.intern(&vt.unit),
        };

        let sample_type = self.sample_type.iter().map(|vt| value_type(&mut st, vt)).collect();
        let period_type = self.period_type.as_ref().map(|vt| value_type(&mut st, vt));

        let sample = self
            .sample
            .iter()
            .map(|s| proto::Sample {
                location_id: s.location.clone(),
                value: s.value.clone(),
                label: s
                    .label
                    .iter()
                    .map(|l| proto::Label {
                        key: st.intern(&l.key),
                        str: st.intern(&l.str),
                        num: l.num,
                        num_unit: st.intern(&l.num_unit),
                    })
                    .collect(),
            })
            .collect();

        let mapping = self
            .mapping
            .iter()
            .map(|m| proto::Mapping {
                id: m.id,
                memory_start: m.start,
                memory_limit: m.limit,
                file_offset: m.offset,
                filename: st.intern(&m.file),
                build_id: st.intern(&m.build_id),
                has_functions: m.has_functions,
                has_filenames: m.has_filenames,
                has_line_numbers: m.has_line_numbers,
                has_inline_frames: m.has_inline_frames,
            })
            .collect();

        let location = self
            .location
            .iter()
            .map(|l| proto::Location {
                id: l.id,
                mapping_id: l.mapping_id,
                address: l.address,
                line: l
                    .line
                    .iter()
                    .map(|ln| proto::Line {
                        function_id: ln.function_id,
                        line: ln.line,
                        column: ln.column,
                    })
                    .collect(),
                is_folded: l.is_folded,
            })
            .collect();

        let function = self
            .function
            .iter()
            .map(|f| proto::Function {
                id: f.id,
                name: st.intern(&f.name),
                system_name: st.intern(&f.system_name),
                filename: st.intern(&f.filename),
                start_line: f.start_line,
            })
            .collect();

        let comment = self.comments.iter().map(|c| st.intern(c)).collect();
        let drop_frames = st.intern(&self.drop_frames);
        let keep_frames = st.intern(&self.keep_frames);
        let default_sample_type = st.intern(&self.default_sample_type);

        proto::Profile {
            sample_type,
            sample,
            mapping,
            location,
            function,
            string_table: st.table,
            drop_frames,
            keep_frames,
            time_nanos: self.time_nanos,
            duration_nanos: self.duration_nanos,
            period_type,
            period: self.period,
            comment,
            default_sample_type,
        }
    }
}

struct StringLookup<'a> {
    table: &'a [String],
}

impl<'a> StringLookup<'a> {
    fn new(table: &'a [String]) -> ProfileResult<Self> {
        match table.first() {
            Some(first) if first.is_empty() => Ok(Self { table }),
            Some(_) => Err(ProfileError::Malformed("string_table[0] must be ''".to_string())),
            None => Err(ProfileError::Malformed("missing string table".to_string())),
        }
    }

    fn get(&self, idx: i64) -> ProfileResult<String> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.table.get(i))
            .cloned()
            .ok_or_else(|| ProfileError::Malformed(format!("string index {idx} out of range")))
    }
}

struct StringTable {
    table: Vec<String>,
    index: HashMap<String, i64>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self { table: vec![String::new()], index: HashMap::from([(String::new(), 0)]) }
    }
}

impl StringTable {
    #[allow(clippy::cast_possible_wrap)]
    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.table.len() as i64;
        self.table.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }
}

fn display_opt(vt: Option<&ValueType>) -> String {
    vt.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

fn join_types(types: &[ValueType]) -> String {
    types.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_profile() -> Profile {
        Profile {
            sample_type: vec![ValueType::new("samples", "count"), ValueType::new("cpu", "nanoseconds")],
            period_type: Some(ValueType::new("cpu", "nanoseconds")),
            period: 10_000_000,
            mapping: vec![Mapping {
                id: 1,
                start: 0x1000,
                limit: 0x5000,
                file: "/usr/bin/server".to_string(),
                build_id: "abc123".to_string(),
                ..Default::default()
            }],
            function: vec![Function { id: 1, name: "main".to_string(), ..Default::default() }],
            location: vec![Location {
                id: 1,
                mapping_id: 1,
                address: 0x1234,
                line: vec![Line { function_id: 1, line: 7, column: 0 }],
                is_folded: false,
            }],
            sample: vec![
                Sample { location: vec![1], value: vec![3, 30], label: vec![] },
                Sample {
                    location: vec![1],
                    value: vec![1, 10],
                    label: vec![Label { key: "thread".to_string(), str: "w1".to_string(), ..Default::default() }],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_parse_preserves_profile() {
        let p = cpu_profile();
        let mut buf = Vec::new();
        p.write(&mut buf).unwrap();
        assert!(buf.starts_with(&GZIP_MAGIC));

        let parsed = Profile::parse(&buf).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_parse_accepts_uncompressed_input() {
        let p = cpu_profile();
        let parsed = Profile::parse(&p.encode_uncompressed()).unwrap();
        assert_eq!(parsed.mapping[0].build_id, "abc123");
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        assert!(matches!(Profile::parse(&[]), Err(ProfileError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Profile::parse(b"definitely not a profile").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_string() {
        let wire = proto::Profile {
            string_table: vec![String::new()],
            sample_type: vec![proto::ValueType { r#type: 5, unit: 0 }],
            ..Default::default()
        };
        let err = Profile::parse(&wire.encode_to_vec()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_check_valid_accepts_consistent_profile() {
        assert!(cpu_profile().check_valid().is_ok());
    }

    #[test]
    fn test_check_valid_rejects_value_count_mismatch() {
        let mut p = cpu_profile();
        p.sample[0].value.pop();
        let err = p.check_valid().unwrap_err();
        assert!(err.to_string().contains("sample has 1 values vs. 2 types"));
    }

    #[test]
    fn test_check_valid_rejects_unknown_mapping() {
        let mut p = cpu_profile();
        p.location[0].mapping_id = 9;
        assert!(p.check_valid().is_err());
    }

    #[test]
    fn test_check_valid_rejects_duplicate_ids() {
        let mut p = cpu_profile();
        let dup = p.mapping[0].clone();
        p.mapping.push(dup);
        assert!(p.check_valid().is_err());
    }

    #[test]
    fn test_scale_negates_values() {
        let mut p = cpu_profile();
        p.scale(-1.0);
        assert_eq!(p.sample[0].value, vec![-3, -30]);
        assert_eq!(p.sample[1].value, vec![-1, -10]);
    }

    #[test]
    fn test_scale_n_drops_samples_scaled_to_zero() {
        let mut p = cpu_profile();
        p.scale_n(&[0.1, 0.01]).unwrap();
        // [3, 30] -> [0, 0] is dropped; [1, 10] -> [0, 0] is dropped too.
        assert!(p.sample.is_empty());
    }

    #[test]
    fn test_scale_n_rejects_wrong_ratio_count() {
        let mut p = cpu_profile();
        assert!(p.scale_n(&[2.0]).is_err());
    }

    #[test]
    fn test_compatible_rejects_different_sample_types() {
        let a = cpu_profile();
        let mut b = cpu_profile();
        b.sample_type[1] = ValueType::new("alloc_space", "bytes");
        assert!(matches!(a.compatible(&b), Err(ProfileError::Incompatible(_))));
    }

    #[test]
    fn test_intern_function_reuses_existing() {
        let mut p = cpu_profile();
        assert_eq!(p.intern_function("main", "", ""), 1);
        assert_eq!(p.intern_function("helper", "", "src/lib.rs"), 2);
        assert_eq!(p.function.len(), 2);
    }
}
