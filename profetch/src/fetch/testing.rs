//! Fakes shared by the fetch engine's unit tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use profetch_common::{Location, Mapping, Profile, Sample, ValueType};

use crate::domain::FetchResult;
use crate::plugin::{Fetched, ObjFile, ObjTool, ProfileFetcher, Ui};

/// A one-sample CPU profile of `/bin/server` with value `value`.
pub fn cpu_profile(value: i64) -> Profile {
    Profile {
        sample_type: vec![ValueType::new("cpu", "nanoseconds")],
        sample: vec![Sample { location: vec![1], value: vec![value], label: vec![] }],
        mapping: vec![Mapping {
            id: 1,
            start: 0x1000,
            limit: 0x5000,
            file: "/bin/server".to_string(),
            ..Default::default()
        }],
        location: vec![Location { id: 1, mapping_id: 1, address: 0x1010, ..Default::default() }],
        period_type: Some(ValueType::new("cpu", "nanoseconds")),
        period: 10_000_000,
        ..Default::default()
    }
}

/// Same shape as [`cpu_profile`] but measuring allocations, so the two
/// cannot be merged.
pub fn alloc_profile(value: i64) -> Profile {
    Profile {
        sample_type: vec![ValueType::new("alloc_space", "bytes")],
        period_type: Some(ValueType::new("space", "bytes")),
        period: 512 * 1024,
        ..cpu_profile(value)
    }
}

/// Serves canned profiles by source address and counts calls
#[derive(Default)]
pub struct MapFetcher {
    profiles: HashMap<String, Fetched>,
    pub calls: AtomicUsize,
}

impl MapFetcher {
    pub fn with(mut self, addr: &str, profile: Profile, source: &str) -> Self {
        self.profiles.insert(addr.to_string(), Fetched { profile, source: source.to_string() });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProfileFetcher for MapFetcher {
    fn fetch(&self, source: &str, _: Duration, _: Duration) -> FetchResult<Option<Fetched>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.get(source).cloned())
    }
}

/// Never finds a binary
pub struct NoObjTool;

impl ObjTool for NoObjTool {
    fn open(&self, path: &Path, _: u64, _: u64, _: u64) -> anyhow::Result<Box<dyn ObjFile>> {
        anyhow::bail!("{} not available", path.display())
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub messages: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Ui for RecordingUi {
    fn print(&self, msg: &str) {
        self.messages.lock().unwrap().push(msg.to_string());
    }

    fn print_err(&self, msg: &str) {
        self.errors.lock().unwrap().push(msg.to_string());
    }
}
