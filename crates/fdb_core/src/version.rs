//! Native library version checks.

use std::cmp::Ordering;

/// Oldest native library version these bindings work with.
pub const MIN_FDB_VERSION: &str = "5.12.1";

/// Compares two dotted version strings numerically.
///
/// Each component contributes its leading digits only, so `5.13.0-rc1`
/// compares as `5.13.0`. Missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Returns true if `found` is at least [`MIN_FDB_VERSION`].
pub fn is_compatible(found: &str) -> bool {
    compare_versions(found, MIN_FDB_VERSION) != Ordering::Less
}

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ordering() {
        assert_eq!(compare_versions("5.12.1", "5.12.10"), Ordering::Less);
        assert_eq!(compare_versions("5.13.0", "5.12.10"), Ordering::Greater);
        assert_eq!(compare_versions("5.12", "5.12.0"), Ordering::Equal);
    }

    #[test]
    fn suffixes_are_ignored() {
        assert_eq!(compare_versions("5.13.0-rc1", "5.13.0"), Ordering::Equal);
        assert_eq!(compare_versions("v5.14.2", "5.14.2"), Ordering::Equal);
    }

    #[test]
    fn minimum_version() {
        assert!(is_compatible("5.12.1"));
        assert!(is_compatible("5.13.2"));
        assert!(!is_compatible("5.6.0"));
        assert!(!is_compatible("5.12.0"));
    }
}
