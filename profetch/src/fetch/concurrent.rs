//! Parallel fetch of one group of sources

use std::thread;

use log::debug;

use super::combine::combine_profiles;
use super::grab::{Fragment, Grab, Grabber};
use crate::domain::{FetchResult, FetchTask};

impl Grabber<'_> {
    /// Fetch every task on its own thread and merge the successes.
    ///
    /// Each task owns a result slot; all threads are joined before any slot
    /// is read. Failed sources are reported as `<addr>: <error>` and
    /// skipped. Returns `None` when no source succeeded.
    ///
    /// # Errors
    /// Returns an error if the successful profiles cannot be merged.
    pub fn concurrent_grab(&self, tasks: &[FetchTask]) -> FetchResult<Option<Grab>> {
        let results: Vec<thread::Result<FetchResult<Fragment>>> = thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .iter()
                .map(|task| scope.spawn(move || self.grab_profile(task)))
                .collect();
            handles.into_iter().map(thread::ScopedJoinHandle::join).collect()
        });

        let mut profiles = Vec::with_capacity(tasks.len());
        let mut sources = Vec::with_capacity(tasks.len());
        let mut remote = false;
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(Ok(fragment)) => {
                    remote |= fragment.remote;
                    profiles.push(fragment.profile);
                    sources.push(fragment.sources);
                }
                Ok(Err(e)) => self.ui.print_err(&format!("{}: {e}", task.addr)),
                Err(_) => self.ui.print_err(&format!("{}: fetch panicked", task.addr)),
            }
        }

        if profiles.is_empty() {
            return Ok(None);
        }
        let count = profiles.len();
        debug!("Fetched {count} of {} sources", tasks.len());

        let (profile, sources) = combine_profiles(profiles, sources)?;
        Ok(Some(Grab { profile, sources, remote, count }))
    }
}
