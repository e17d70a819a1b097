//! Equal split rule.
//!
//! # Invariants
//! - Output order equals input order.
//! - Shares of a non-empty input always sum to exactly 100%.
//! - Every beneficiary except the last gets `round(100 / N, 2dp)`; the last
//!   one absorbs the rounding remainder.

use crate::model::allocation::{Percentage, FULL_BASIS_POINTS};

/// Splits 100% evenly across `ordered`.
///
/// Order matters only for the remainder: the last key receives
/// `100 - (N - 1) * share`, so the first `N - 1` shares are identical.
pub fn equal_split<K: Clone>(ordered: &[K]) -> Vec<(K, Percentage)> {
    let Some((last, rest)) = ordered.split_last() else {
        return Vec::new();
    };

    let share = per_head_share(ordered.len() as u64);
    let full = u64::from(FULL_BASIS_POINTS);
    let remainder = full - share * rest.len() as u64;

    let mut shares = Vec::with_capacity(ordered.len());
    shares.extend(
        rest.iter()
            .map(|key| (key.clone(), to_percentage(share))),
    );
    shares.push((last.clone(), to_percentage(remainder)));
    shares
}

/// Basis points given to every beneficiary but the last.
fn per_head_share(count: u64) -> u64 {
    let full = u64::from(FULL_BASIS_POINTS);
    if count <= 1 {
        return full;
    }

    // Half-up rounding of full / count.
    let rounded = (2 * full + count) / (2 * count);
    if rounded * (count - 1) <= full {
        rounded
    } else {
        // Thousands of heads: rounding up would leave the last share negative.
        full / count
    }
}

fn to_percentage(basis_points: u64) -> Percentage {
    Percentage::from_basis_points(u32::try_from(basis_points).unwrap_or(FULL_BASIS_POINTS))
}
