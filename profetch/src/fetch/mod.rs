//! # Profile Acquisition
//!
//! Turns a list of source strings into one aggregate profile.
//!
//! ```text
//! sources ──▶ chunks of 64 ──▶ one thread per source ──▶ merge chunk ──┐
//!                                  │                                    │
//!                                  ├─ fetcher override / resolver       ▼
//!                                  ├─ check_valid + scale (±1)    running aggregate
//!                                  └─ locate local binaries             │
//!                                                                       ▼
//!                     symbolize ──▶ prune frames ──▶ save (remote) ──▶ check_valid
//! ```
//!
//! A failing source is reported and skipped; a merge failure aborts the run.

pub mod chunked;
pub mod combine;
pub mod concurrent;
pub mod grab;
pub mod locator;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

use log::{info, warn};
use profetch_common::Profile;

use crate::config::{FetchEnv, SourceConfig};
use crate::domain::{FetchError, FetchResult};
use crate::plugin::{ObjTool, ProfileFetcher, Symbolize, Ui};
use crate::save::save_profile;

pub use chunked::CHUNK_SIZE;
pub use grab::{Fragment, Grab, Grabber};

/// Plugins used by [`fetch_profiles`]
#[derive(Clone, Copy)]
pub struct Options<'a> {
    /// Tried first for every source; `None` uses the built-in resolver only.
    pub fetcher: Option<&'a dyn ProfileFetcher>,
    pub obj: &'a dyn ObjTool,
    pub ui: &'a dyn Ui,
    pub sym: &'a dyn Symbolize,
}

/// Fetch, merge, symbolize and validate every source in `config`.
///
/// Remote profiles are also saved to disk; a failure to save is reported
/// and otherwise ignored.
///
/// # Errors
/// Returns an error if no source could be fetched, the fetched profiles
/// cannot be merged, symbolization fails, or the result is invalid.
pub fn fetch_profiles(
    config: &SourceConfig,
    env: &FetchEnv,
    o: &Options<'_>,
) -> FetchResult<Profile> {
    let tasks = config.tasks();
    let grabber = Grabber::new(config, env, o.fetcher, o.obj, o.ui);

    let Some(grab) = grabber.chunked_grab(&tasks)? else {
        return Err(FetchError::NoProfilesFetched);
    };
    if grab.count != tasks.len() {
        o.ui.print_err(&format!("fetched {} profiles out of {}", grab.count, tasks.len()));
    }

    let Grab { mut profile, sources, remote, .. } = grab;
    o.sym
        .symbolize(config.symbolize, &sources, &mut profile)
        .map_err(|e| FetchError::Symbolization(format!("{e:#}")))?;
    if let Err(e) = profile.remove_uninteresting() {
        warn!("Ignoring frame filters: {e}");
    }
    sources.unsource(&mut profile);

    if remote {
        match save_profile(&profile, env, o.ui) {
            Ok(path) => o.ui.print_err(&format!("Saved profile in {}", path.display())),
            Err(e) => o.ui.print_err(&format!("Could not save profile: {e}")),
        }
    }

    profile.check_valid()?;
    info!("Aggregated {} samples from {} sources", profile.sample.len(), tasks.len());
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MappingSources;
    use crate::fetch::testing::{cpu_profile, MapFetcher, NoObjTool, RecordingUi};
    use crate::symbolization::{SymbolizeMode, Symbolizer};
    use std::path::PathBuf;

    fn options<'a>(
        fetcher: &'a MapFetcher,
        ui: &'a RecordingUi,
        sym: &'a Symbolizer,
    ) -> Options<'a> {
        Options { fetcher: Some(fetcher), obj: &NoObjTool, ui, sym }
    }

    fn config(sources: &[&str], base: &[&str]) -> SourceConfig {
        SourceConfig {
            sources: sources.iter().map(ToString::to_string).collect(),
            base: base.iter().map(ToString::to_string).collect(),
            symbolize: SymbolizeMode::None,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_profiles_fetched() {
        let fetcher = MapFetcher::default();
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        let cfg = config(&["/nonexistent/a"], &[]);
        let err = fetch_profiles(&cfg, &FetchEnv::default(), &options(&fetcher, &ui, &sym))
            .unwrap_err();
        assert!(matches!(err, FetchError::NoProfilesFetched));
    }

    #[test]
    fn test_partial_fetch_is_reported() {
        let fetcher = MapFetcher::default().with("a", cpu_profile(2), "");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        let cfg = config(&["a", "/nonexistent/b"], &[]);
        let p = fetch_profiles(&cfg, &FetchEnv::default(), &options(&fetcher, &ui, &sym)).unwrap();
        assert_eq!(p.sample[0].value, vec![2]);
        assert!(ui.errors().contains(&"fetched 1 profiles out of 2".to_string()));
    }

    #[test]
    fn test_numerator_minus_identical_base_is_empty() {
        let fetcher = MapFetcher::default().with("a", cpu_profile(5), "");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        let cfg = config(&["a"], &["a"]);
        let p = fetch_profiles(&cfg, &FetchEnv::default(), &options(&fetcher, &ui, &sym)).unwrap();
        assert!(p.sample.iter().all(|s| s.value.iter().all(|&v| v == 0)));
    }

    #[test]
    fn test_drop_frames_are_applied_after_merge() {
        use profetch_common::{Function, Line, Location};

        let mut p = cpu_profile(3);
        p.function = vec![
            Function { id: 1, name: "runtime.mallocgc".into(), ..Default::default() },
            Function { id: 2, name: "main.serve".into(), ..Default::default() },
        ];
        p.location[0].line = vec![Line { function_id: 1, line: 0, column: 0 }];
        p.location.push(Location {
            id: 2,
            mapping_id: 1,
            address: 0x1020,
            line: vec![Line { function_id: 2, line: 0, column: 0 }],
            is_folded: false,
        });
        p.sample[0].location = vec![1, 2];
        p.drop_frames = "runtime\\..*".to_string();

        let fetcher = MapFetcher::default().with("a", p, "");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();
        let env = FetchEnv::default();
        let out = fetch_profiles(&config(&["a"], &[]), &env, &options(&fetcher, &ui, &sym)).unwrap();

        assert_eq!(out.sample.len(), 1);
        let leaf = out.location.iter().find(|l| l.id == out.sample[0].location[0]).unwrap();
        assert_eq!(leaf.address, 0x1020);
    }

    #[test]
    fn test_anonymous_mappings_lose_their_source_name() {
        let mut p = cpu_profile(1);
        p.mapping[0].file.clear();
        let fetcher = MapFetcher::default().with("a", p, "http://host/debug/pprof/heap");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();
        let dir = tempfile::tempdir().unwrap();
        let env = FetchEnv { tmp_dir: Some(dir.path().to_path_buf()), ..Default::default() };

        let cfg = config(&["a"], &[]);
        let out = fetch_profiles(&cfg, &env, &options(&fetcher, &ui, &sym)).unwrap();
        assert!(out.mapping[0].file.is_empty());
    }

    #[test]
    fn test_remote_profile_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let env = FetchEnv { tmp_dir: Some(dir.path().to_path_buf()), ..Default::default() };
        let fetcher =
            MapFetcher::default().with("a", cpu_profile(1), "http://host/debug/pprof/profile");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        fetch_profiles(&config(&["a"], &[]), &env, &options(&fetcher, &ui, &sym)).unwrap();

        let saved = dir.path().join("pprof.server.cpu.001.pb.gz");
        assert!(saved.is_file());
        assert!(ui.errors().contains(&format!("Saved profile in {}", saved.display())));
    }

    #[test]
    fn test_save_failure_is_not_fatal() {
        let env = FetchEnv {
            tmp_dir: Some(PathBuf::from("/nonexistent/save/dir")),
            ..Default::default()
        };
        let fetcher = MapFetcher::default().with("a", cpu_profile(1), "http://host/profile");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        let p = fetch_profiles(&config(&["a"], &[]), &env, &options(&fetcher, &ui, &sym)).unwrap();
        assert_eq!(p.sample.len(), 1);
        assert!(ui.errors().iter().any(|e| e.starts_with("Could not save profile: ")));
    }

    #[test]
    fn test_local_profile_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let env = FetchEnv { tmp_dir: Some(dir.path().to_path_buf()), ..Default::default() };
        let fetcher = MapFetcher::default().with("a", cpu_profile(1), "");
        let ui = RecordingUi::default();
        let sym = Symbolizer::default();

        fetch_profiles(&config(&["a"], &[]), &env, &options(&fetcher, &ui, &sym)).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    struct FailingSymbolizer;

    impl Symbolize for FailingSymbolizer {
        fn symbolize(
            &self,
            _: SymbolizeMode,
            _: &MappingSources,
            _: &mut Profile,
        ) -> anyhow::Result<()> {
            anyhow::bail!("symbol server unreachable")
        }
    }

    #[test]
    fn test_symbolization_error_is_fatal() {
        let fetcher = MapFetcher::default().with("a", cpu_profile(1), "");
        let ui = RecordingUi::default();
        let o =
            Options { fetcher: Some(&fetcher), obj: &NoObjTool, ui: &ui, sym: &FailingSymbolizer };

        let err = fetch_profiles(&config(&["a"], &[]), &FetchEnv::default(), &o).unwrap_err();
        assert!(matches!(err, FetchError::Symbolization(_)));
    }
}
