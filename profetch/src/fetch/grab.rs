//! Per-source fetch unit

use std::path::PathBuf;

use log::debug;
use profetch_common::Profile;

use super::locator::{locate_binaries, MainBinary};
use super::resolver;
use crate::config::{FetchEnv, SourceConfig};
use crate::domain::{FetchResult, FetchTask, MappingSources};
use crate::plugin::{Fetched, ObjTool, ProfileFetcher, Ui};

/// One successfully fetched source
#[derive(Debug, Clone)]
pub struct Fragment {
    pub profile: Profile,
    pub sources: MappingSources,
    pub remote: bool,
}

/// Aggregate of a group of fetched sources
#[derive(Debug, Clone)]
pub struct Grab {
    pub profile: Profile,
    pub sources: MappingSources,
    /// At least one contributing source was remote.
    pub remote: bool,
    /// Number of sources that contributed.
    pub count: usize,
}

/// Fetches sources and groups of sources
///
/// Shared by every parallel fetch unit, so everything it holds is `Sync`.
pub struct Grabber<'a> {
    pub(crate) config: &'a SourceConfig,
    pub(crate) search_path: Vec<PathBuf>,
    pub(crate) fetcher: Option<&'a dyn ProfileFetcher>,
    pub(crate) obj: &'a dyn ObjTool,
    pub(crate) ui: &'a dyn Ui,
}

impl<'a> Grabber<'a> {
    #[must_use]
    pub fn new(
        config: &'a SourceConfig,
        env: &FetchEnv,
        fetcher: Option<&'a dyn ProfileFetcher>,
        obj: &'a dyn ObjTool,
        ui: &'a dyn Ui,
    ) -> Self {
        Self { config, search_path: env.binary_search_path(), fetcher, obj, ui }
    }

    fn try_fetcher(&self, addr: &str) -> Option<Fetched> {
        let fetcher = self.fetcher?;
        match fetcher.fetch(addr, self.config.duration, self.config.timeout) {
            Ok(fetched) => fetched,
            Err(e) => {
                debug!("Fetcher override failed for {addr}, using built-in resolver: {e}");
                None
            }
        }
    }

    /// Fetch one source, validate and scale it, and locate its binaries.
    ///
    /// # Errors
    /// Returns an error if the source cannot be fetched or parsed, or the
    /// profile is internally inconsistent.
    pub fn grab_profile(&self, task: &FetchTask) -> FetchResult<Fragment> {
        let fetched = match self.try_fetcher(&task.addr) {
            Some(fetched) => fetched,
            None => resolver::fetch(
                &task.addr,
                self.config.duration,
                self.config.timeout,
                &self.config.perf_converter,
                self.ui,
            )?,
        };
        let Fetched { mut profile, source } = fetched;

        profile.check_valid()?;
        profile.scale(task.scale);

        let main = MainBinary {
            exec_name: self.config.exec_name.as_deref(),
            build_id: self.config.build_id.as_deref(),
        };
        locate_binaries(&mut profile, main, &self.search_path, self.obj, self.ui);

        let remote = !source.is_empty();
        let sources = if remote {
            MappingSources::collect(&mut profile, &source)
        } else {
            MappingSources::new()
        };
        Ok(Fragment { profile, sources, remote })
    }
}
