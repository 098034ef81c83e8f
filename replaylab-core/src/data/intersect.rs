//! Common timeline across symbols.

use std::collections::HashSet;

/// Timestamps present in every input, sorted ascending.
///
/// Seeds from the first series' positive timestamps, intersects with each
/// following series and short-circuits to empty as soon as any input (or
/// the running intersection) is empty.
pub fn build_intersection(series: &[&[i64]]) -> Vec<i64> {
    build_intersection_in(series, &mut HashSet::new(), &mut HashSet::new())
}

/// `build_intersection` over caller-supplied scratch sets, typically rented
/// from `EnginePools::timestamp_sets`. Both sets are cleared first and left
/// holding intermediate state.
pub fn build_intersection_in(
    series: &[&[i64]],
    common: &mut HashSet<i64>,
    scratch: &mut HashSet<i64>,
) -> Vec<i64> {
    common.clear();
    let Some((first, rest)) = series.split_first() else {
        return Vec::new();
    };
    common.extend(first.iter().copied().filter(|&t| t > 0));
    for timestamps in rest {
        if common.is_empty() || timestamps.is_empty() {
            return Vec::new();
        }
        scratch.clear();
        scratch.extend(timestamps.iter().copied());
        common.retain(|t| scratch.contains(t));
    }
    let mut out: Vec<i64> = common.iter().copied().collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersects_and_sorts() {
        let a = [5, 1, 3, 7];
        let b = [7, 3, 9, 1];
        assert_eq!(build_intersection(&[&a, &b]), vec![1, 3, 7]);
    }

    #[test]
    fn empty_input_short_circuits() {
        let a = [1, 2, 3];
        let b: [i64; 0] = [];
        assert!(build_intersection(&[&a, &b]).is_empty());
        assert!(build_intersection(&[]).is_empty());
    }

    #[test]
    fn non_positive_seed_timestamps_are_dropped() {
        let a = [-5, 0, 10, 20];
        assert_eq!(build_intersection(&[&a]), vec![10, 20]);
    }

    #[test]
    fn dirty_scratch_sets_do_not_leak() {
        let mut common: HashSet<i64> = [99, 100].into_iter().collect();
        let mut scratch: HashSet<i64> = [1, 2, 3, 99].into_iter().collect();
        let a = [1, 2, 3];
        let b = [2, 3, 4];
        assert_eq!(
            build_intersection_in(&[&a, &b], &mut common, &mut scratch),
            vec![2, 3]
        );
        assert_eq!(
            build_intersection_in(&[&[5, 6][..]], &mut common, &mut scratch),
            vec![5, 6]
        );
    }

    #[test]
    fn duplicates_collapse() {
        let a = [2, 2, 4];
        let b = [4, 2, 2];
        assert_eq!(build_intersection(&[&a, &b]), vec![2, 4]);
    }
}
