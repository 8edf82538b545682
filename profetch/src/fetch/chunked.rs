//! Bounded-parallelism fetch over arbitrarily many sources

use log::debug;

use super::combine::combine_profiles;
use super::grab::{Grab, Grabber};
use crate::domain::{FetchResult, FetchTask};

/// Maximum number of sources fetched at the same time.
pub const CHUNK_SIZE: usize = 64;

impl Grabber<'_> {
    /// Fetch `tasks` in consecutive groups of at most [`CHUNK_SIZE`],
    /// merging each group's result into a running aggregate.
    ///
    /// Groups with no successful source are skipped. Returns `None` when no
    /// source succeeded at all.
    ///
    /// # Errors
    /// A merge error in any group, or between groups, aborts the whole run;
    /// later groups are not fetched.
    pub fn chunked_grab(&self, tasks: &[FetchTask]) -> FetchResult<Option<Grab>> {
        let mut acc: Option<Grab> = None;
        for (i, chunk) in tasks.chunks(CHUNK_SIZE).enumerate() {
            debug!("Fetching group {} ({} sources)", i + 1, chunk.len());
            let Some(next) = self.concurrent_grab(chunk)? else {
                continue;
            };
            acc = Some(match acc.take() {
                None => next,
                Some(prev) => {
                    let (profile, sources) = combine_profiles(
                        vec![prev.profile, next.profile],
                        vec![prev.sources, next.sources],
                    )?;
                    Grab {
                        profile,
                        sources,
                        remote: prev.remote || next.remote,
                        count: prev.count + next.count,
                    }
                }
            });
        }
        Ok(acc)
    }
}
