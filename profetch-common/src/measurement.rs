//! Unit normalization across profiles
//!
//! Profiles collected by different agents may report the same quantity in
//! different units (`milliseconds` vs `nanoseconds`, `kilobytes` vs `bytes`).
//! Before merging, [`scale_profiles`] converts every profile to the finest
//! unit in use for each sample type and for the period type.

use crate::error::{ProfileError, ProfileResult};
use crate::profile::{Profile, ValueType};

/// A family of convertible units. Factors are relative to the finest unit.
struct UnitFamily {
    units: &'static [(&'static [&'static str], f64)],
}

const UNIT_FAMILIES: &[UnitFamily] = &[
    UnitFamily {
        units: &[
            (&["ns", "nanosecond"], 1.0),
            (&["us", "microsecond"], 1e3),
            (&["ms", "millisecond"], 1e6),
            (&["s", "sec", "second"], 1e9),
            (&["m", "min", "minute"], 60e9),
            (&["h", "hour"], 3600e9),
        ],
    },
    UnitFamily {
        units: &[
            (&["b", "byte"], 1.0),
            (&["kb", "kbyte", "kilobyte"], 1024.0),
            (&["mb", "mbyte", "megabyte"], 1024.0 * 1024.0),
            (&["gb", "gbyte", "gigabyte"], 1024.0 * 1024.0 * 1024.0),
            (&["tb", "tbyte", "terabyte"], 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ],
    },
];

impl UnitFamily {
    fn factor(&self, unit: &str) -> Option<f64> {
        let unit = normalize_unit(unit);
        self.units.iter().find(|(names, _)| names.contains(&unit.as_str())).map(|&(_, f)| f)
    }
}

fn normalize_unit(unit: &str) -> String {
    let unit = unit.to_lowercase();
    if unit.len() > 2 {
        if let Some(stripped) = unit.strip_suffix('s') {
            return stripped.to_string();
        }
    }
    unit
}

/// Convert `value` from unit `from` to unit `to`.
///
/// Returns `None` when the units are not known to be convertible.
#[must_use]
pub fn scale(value: f64, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    UNIT_FAMILIES.iter().find_map(|family| {
        let f = family.factor(from)?;
        let t = family.factor(to)?;
        Some(value * f / t)
    })
}

fn compatible_value_types(a: &ValueType, b: &ValueType) -> bool {
    // A trailing 's' is tolerated: "sample" vs "samples".
    if a.ty.trim_end_matches('s') != b.ty.trim_end_matches('s') {
        return false;
    }
    a.unit == b.unit
        || UNIT_FAMILIES.iter().any(|f| f.factor(&a.unit).is_some() && f.factor(&b.unit).is_some())
}

/// The finest of a set of compatible value types, or `None` for fewer than
/// two types.
///
/// # Errors
/// Returns an error if any two types cannot be converted into each other.
pub fn common_value_type(types: &[&ValueType]) -> ProfileResult<Option<ValueType>> {
    if types.len() <= 1 {
        return Ok(None);
    }
    let mut min = types[0];
    for &t in &types[1..] {
        if !compatible_value_types(min, t) {
            return Err(ProfileError::Incompatible(format!("incompatible types: {min} {t}")));
        }
        if scale(1.0, &t.unit, &min.unit).is_some_and(|r| r < 1.0) {
            min = t;
        }
    }
    Ok(Some(min.clone()))
}

/// Rescale `profiles` so each sample type and the period type use a common
/// unit across all of them.
///
/// # Errors
/// Returns an error if the profiles have a different number of sample types
/// or any pair of corresponding types is incompatible.
#[allow(clippy::cast_possible_truncation)]
pub fn scale_profiles(profiles: &mut [Profile]) -> ProfileResult<()> {
    let Some(first) = profiles.first() else {
        return Ok(());
    };

    let period_types: Vec<&ValueType> =
        profiles.iter().filter_map(|p| p.period_type.as_ref()).collect();
    let period_type = common_value_type(&period_types)
        .map_err(|e| ProfileError::Incompatible(format!("period type: {e}")))?;

    let num_sample_types = first.sample_type.len();
    if let Some(p) = profiles.iter().find(|p| p.sample_type.len() != num_sample_types) {
        return Err(ProfileError::Incompatible(format!(
            "inconsistent samples type count: {} != {}",
            num_sample_types,
            p.sample_type.len()
        )));
    }

    let mut sample_type = Vec::with_capacity(num_sample_types);
    for i in 0..num_sample_types {
        let types: Vec<&ValueType> = profiles.iter().map(|p| &p.sample_type[i]).collect();
        let common = common_value_type(&types)
            .map_err(|e| ProfileError::Incompatible(format!("sample types: {e}")))?;
        sample_type.push(common);
    }

    for p in profiles.iter_mut() {
        if let (Some(pt), Some(common)) = (p.period_type.as_mut(), period_type.as_ref()) {
            #[allow(clippy::cast_precision_loss)]
            let period = scale(p.period as f64, &pt.unit, &common.unit).unwrap_or(p.period as f64);
            p.period = period as i64;
            pt.unit.clone_from(&common.unit);
        }

        let mut ratios = Vec::with_capacity(p.sample_type.len());
        for (st, common) in p.sample_type.iter_mut().zip(&sample_type) {
            match common {
                Some(common) => {
                    ratios.push(scale(1.0, &st.unit, &common.unit).unwrap_or(1.0));
                    st.unit.clone_from(&common.unit);
                }
                None => ratios.push(1.0),
            }
        }
        p.scale_n(&ratios)?;
    }
    Ok(())
}
