//! Domain types for fetching and provenance tracking

use std::collections::BTreeMap;
use std::fmt;

use profetch_common::{Mapping, Profile};

/// One source address to fetch, with the factor applied to its samples
///
/// Numerator sources carry `+1`; base sources carry `-1` so merging them
/// yields a differential profile.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    pub addr: String,
    pub scale: f64,
}

impl FetchTask {
    #[must_use]
    pub fn numerator(addr: &str) -> Self {
        Self { addr: addr.to_string(), scale: 1.0 }
    }

    #[must_use]
    pub fn base(addr: &str) -> Self {
        Self { addr: addr.to_string(), scale: -1.0 }
    }
}

/// Where a mapping was fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSource {
    /// Canonical source URL the profile was fetched from.
    pub source: String,
    /// Start address of the mapping in that source's address space.
    pub start: u64,
}

/// Identity of a binary image across profiles
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MappingKey {
    BuildId(String),
    File(String),
    /// Mapping with neither build id nor file, keyed by the source it came
    /// from.
    Source(String),
}

impl MappingKey {
    #[must_use]
    pub fn for_mapping(m: &Mapping, source: &str) -> Self {
        if !m.build_id.is_empty() {
            Self::BuildId(m.build_id.clone())
        } else if !m.file.is_empty() {
            Self::File(m.file.clone())
        } else {
            Self::Source(source.to_string())
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildId(s) | Self::File(s) | Self::Source(s) => f.write_str(s),
        }
    }
}

/// Provenance map: every remote origin of every binary image
///
/// Entries are only ever appended; merging two maps concatenates the entry
/// lists of shared keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingSources {
    entries: BTreeMap<MappingKey, Vec<MappingSource>>,
}

impl MappingSources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source` as the origin of every mapping in `p`.
    ///
    /// Mappings with neither build id nor file take `source` as their file,
    /// so that merging keeps anonymous mappings of different origins apart.
    /// [`MappingSources::unsource`] undoes this once symbolization is done.
    #[must_use]
    pub fn collect(p: &mut Profile, source: &str) -> Self {
        let mut ms = Self::new();
        for m in &mut p.mapping {
            let key = MappingKey::for_mapping(m, source);
            if let MappingKey::Source(s) = &key {
                m.file.clone_from(s);
            }
            ms.push(key, MappingSource { source: source.to_string(), start: m.start });
        }
        ms
    }

    /// Clear the file of every mapping that was named after its source.
    pub fn unsource(&self, p: &mut Profile) {
        for m in &mut p.mapping {
            let key = MappingKey::Source(m.file.clone());
            if m.build_id.is_empty() && self.entries.contains_key(&key) {
                m.file.clear();
            }
        }
    }

    pub fn push(&mut self, key: MappingKey, src: MappingSource) {
        self.entries.entry(key).or_default().push(src);
    }

    /// Append all entries of `other`, after this map's own entries.
    pub fn extend(&mut self, other: MappingSources) {
        for (key, srcs) in other.entries {
            self.entries.entry(key).or_default().extend(srcs);
        }
    }

    #[must_use]
    pub fn get(&self, key: &MappingKey) -> Option<&[MappingSource]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Origins recorded for mapping `m` of the aggregate profile.
    ///
    /// Origins whose start matches `m` come first.
    #[must_use]
    pub fn sources_for(&self, m: &Mapping) -> Vec<&MappingSource> {
        let mut found = if !m.build_id.is_empty() {
            self.iter_key(&MappingKey::BuildId(m.build_id.clone()))
        } else if m.file.is_empty() {
            Vec::new()
        } else {
            let file = self.iter_key(&MappingKey::File(m.file.clone()));
            if file.is_empty() {
                self.iter_key(&MappingKey::Source(m.file.clone()))
            } else {
                file
            }
        };
        found.sort_by_key(|s| s.start != m.start);
        found
    }

    fn iter_key(&self, key: &MappingKey) -> Vec<&MappingSource> {
        self.entries.get(key).map(|v| v.iter().collect()).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MappingKey, &[MappingSource])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(file: &str, build_id: &str, start: u64) -> Mapping {
        Mapping {
            id: 1,
            start,
            limit: start + 0x1000,
            file: file.to_string(),
            build_id: build_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_prefers_build_id_then_file_then_source() {
        let src = "http://host/debug/pprof/profile";
        assert_eq!(
            MappingKey::for_mapping(&mapping("/bin/a", "b1d", 0), src),
            MappingKey::BuildId("b1d".to_string())
        );
        assert_eq!(
            MappingKey::for_mapping(&mapping("/bin/a", "", 0), src),
            MappingKey::File("/bin/a".to_string())
        );
        assert_eq!(
            MappingKey::for_mapping(&mapping("", "", 0), src),
            MappingKey::Source(src.to_string())
        );
    }

    #[test]
    fn test_extend_concatenates_shared_keys_in_order() {
        let key = MappingKey::BuildId("b1d".to_string());
        let mut a = MappingSources::new();
        a.push(key.clone(), MappingSource { source: "a1".to_string(), start: 1 });
        a.push(key.clone(), MappingSource { source: "a2".to_string(), start: 2 });
        let mut b = MappingSources::new();
        b.push(key.clone(), MappingSource { source: "b1".to_string(), start: 3 });

        a.extend(b);
        let sources: Vec<&str> = a.get(&key).unwrap().iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_anonymous_mappings_are_named_after_their_source() {
        let src = "http://host/debug/pprof/heap";
        let mut p = Profile {
            mapping: vec![mapping("", "", 0x4000), Mapping { id: 2, ..mapping("", "", 0x9000) }],
            ..Default::default()
        };
        let ms = MappingSources::collect(&mut p, src);

        assert_eq!(p.mapping[0].file, src);
        let found = ms.sources_for(&p.mapping[1]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].start, 0x9000);

        ms.unsource(&mut p);
        assert!(p.mapping.iter().all(|m| m.file.is_empty()));
    }

    #[test]
    fn test_unsource_keeps_real_files() {
        let mut p = Profile { mapping: vec![mapping("/bin/a", "", 0x1000)], ..Default::default() };
        let ms = MappingSources::collect(&mut p, "http://host/profile");
        ms.unsource(&mut p);
        assert_eq!(p.mapping[0].file, "/bin/a");
        assert_eq!(ms.sources_for(&p.mapping[0])[0].source, "http://host/profile");
    }
}
