//! Dotted version comparison for update checks

use std::cmp::Ordering;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compare two dotted version strings component-wise and numerically.
///
/// A leading 'v' is tolerated, missing trailing components count as zero
/// and non-numeric components count as zero, so `"1.0.3" < "1.0.10"` and
/// `"1.0" == "1.0.0"`.
pub fn compare(a: &str, b: &str) -> Ordering {
    let a_parts = parse(a);
    let b_parts = parse(b);

    let len = a_parts.len().max(b_parts.len());
    for i in 0..len {
        let left = a_parts.get(i).copied().unwrap_or(0);
        let right = b_parts.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

fn parse(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}
