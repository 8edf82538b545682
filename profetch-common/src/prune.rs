//! Frame pruning driven by the profile's `drop_frames` / `keep_frames`

use std::collections::HashSet;

use regex::Regex;

use crate::error::ProfileResult;
use crate::profile::Profile;

/// Strip the argument list from an unsimplified function name.
///
/// Parentheses of `(anonymous namespace)` and `operator()` are part of the
/// name and are skipped.
fn simplify_function_name(name: &str) -> &str {
    const ANONYMOUS: &str = "(anonymous namespace)";
    let name = name.strip_prefix('.').unwrap_or(name);
    let mut from = 0;
    while let Some(pos) = name[from..].find('(').map(|p| p + from) {
        if name[pos..].starts_with(ANONYMOUS) {
            from = pos + ANONYMOUS.len();
        } else if name[..pos].ends_with("operator") && name[pos..].starts_with("()") {
            from = pos + 2;
        } else {
            return &name[..pos];
        }
    }
    name
}

fn anchored(pattern: &str) -> ProfileResult<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}

impl Profile {
    /// Apply the profile's own frame filters.
    ///
    /// Does nothing when `drop_frames` is empty.
    ///
    /// # Errors
    /// Returns an error if either filter is not a valid regex.
    pub fn remove_uninteresting(&mut self) -> ProfileResult<()> {
        if self.drop_frames.is_empty() {
            return Ok(());
        }
        let drop = anchored(&self.drop_frames)?;
        let keep =
            if self.keep_frames.is_empty() { None } else { Some(anchored(&self.keep_frames)?) };
        self.prune(&drop, keep.as_ref());
        Ok(())
    }

    /// Remove frames matching `drop` (and not `keep`) along with every
    /// frame they call.
    ///
    /// Frames below the first non-matching caller are never removed, so a
    /// stack made only of matching frames is left intact.
    pub fn prune(&mut self, drop: &Regex, keep: Option<&Regex>) {
        let dropped: HashSet<u64> = self
            .function
            .iter()
            .filter(|f| {
                let name = simplify_function_name(&f.name);
                !f.name.is_empty()
                    && drop.is_match(name)
                    && !keep.is_some_and(|k| k.is_match(name))
            })
            .map(|f| f.id)
            .collect();

        // A location matching on its outermost frame goes away whole; any
        // other match keeps only the frames above it.
        let mut prune = HashSet::new();
        let mut prune_beneath = HashSet::new();
        for loc in &mut self.location {
            let hit = loc.line.iter().rposition(|l| dropped.contains(&l.function_id));
            let Some(i) = hit else {
                continue;
            };
            prune_beneath.insert(loc.id);
            if i == loc.line.len() - 1 {
                prune.insert(loc.id);
            } else {
                loc.line.drain(..=i);
            }
        }

        for sample in &mut self.sample {
            let mut found_user = false;
            for i in (0..sample.location.len()).rev() {
                let id = sample.location[i];
                if !prune.contains(&id) && !prune_beneath.contains(&id) {
                    found_user = true;
                    continue;
                }
                if !found_user {
                    continue;
                }
                if prune.contains(&id) {
                    sample.location.drain(..=i);
                } else {
                    sample.location.drain(..i);
                }
                break;
            }
        }
    }
}
