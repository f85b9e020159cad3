use std::collections::HashMap;

/// The first result, in receipt order, that occurs at least `f + 1` times.
///
/// With at most `f` faulty replicas only one value can legitimately reach the
/// threshold, so no tie-break beyond receipt order is needed.
pub fn reconcile(results: &[i64], num_faulty: usize) -> Option<i64> {
    let mut counts = HashMap::<_, usize>::new();
    for result in results {
        *counts.entry(result).or_default() += 1
    }
    results
        .iter()
        .copied()
        .find(|result| counts[result] > num_faulty)
}
