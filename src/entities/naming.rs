//! Display-name disambiguation: "Clip", "Clip.001", "Clip.002".

use std::collections::HashSet;

use crate::config::NAME_SUFFIX_DIGITS;

/// Split "Clip.004" into ("Clip", Some(4)). Names without a numeric
/// `.NNN` tail come back whole.
pub fn split_suffix(name: &str) -> (&str, Option<u32>) {
    match name.rsplit_once('.') {
        Some((stem, digits))
            if !stem.is_empty()
                && !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (stem, digits.parse().ok())
        }
        _ => (name, None),
    }
}

/// First free name for `wanted` given the names already `taken`.
///
/// An untaken name is returned as-is. Otherwise the suffix is stripped and
/// the next number after the highest one in use for that stem is appended.
pub fn unique_name(wanted: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(wanted) {
        return wanted.to_string();
    }
    let (stem, _) = split_suffix(wanted);

    let mut max_num = 0u32;
    for name in taken {
        let (other, num) = split_suffix(name);
        if other == stem {
            max_num = max_num.max(num.unwrap_or(0));
        }
    }

    let candidate = |n: u32| format!("{}.{:0width$}", stem, n, width = NAME_SUFFIX_DIGITS);
    if let Some(next) = max_num.checked_add(1) {
        let name = candidate(next);
        if !taken.contains(&name) {
            return name;
        }
    }
    // Highest suffix already in use: take the lowest free one
    (1..=u32::MAX)
        .map(candidate)
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| wanted.to_string())
}
