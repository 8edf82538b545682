//! Merging of fetched profiles and their provenance

use profetch_common::{measurement, merge, Profile};

use crate::domain::{FetchResult, MappingSources};

/// Bring `profiles` to common units, merge them, and concatenate their
/// provenance maps in order.
///
/// # Errors
/// Returns an error if the profiles are not compatible.
pub fn combine_profiles(
    mut profiles: Vec<Profile>,
    sources: Vec<MappingSources>,
) -> FetchResult<(Profile, MappingSources)> {
    measurement::scale_profiles(&mut profiles)?;
    let merged = merge(&profiles)?;

    let mut combined = MappingSources::new();
    for s in sources {
        combined.extend(s);
    }
    Ok((merged, combined))
}
