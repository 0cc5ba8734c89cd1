//! Round-robin work distribution.
//!
//! Row `i` goes to worker `i mod workers`. Each worker owns its bucket, so
//! no queue is shared between tasks.

/// Partition `items` into `workers` buckets, preserving order within each.
///
/// Returns an empty vector when `workers` is zero.
///
/// ```rust
/// use certbatch::pipeline::distribute::distribute;
///
/// let buckets = distribute(vec![1, 2, 3, 4, 5], 2);
/// assert_eq!(buckets, vec![vec![1, 3, 5], vec![2, 4]]);
/// ```
pub fn distribute<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    if workers == 0 {
        return Vec::new();
    }
    let per = items.len().div_ceil(workers);
    let mut buckets: Vec<Vec<T>> = (0..workers).map(|_| Vec::with_capacity(per)).collect();
    for (i, item) in items.into_iter().enumerate() {
        buckets[i % workers].push(item);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_workers_than_rows() {
        let buckets = distribute(vec!['a', 'b'], 4);
        assert_eq!(buckets, vec![vec!['a'], vec!['b'], vec![], vec![]]);
    }

    #[test]
    fn zero_workers() {
        assert!(distribute(vec![1, 2], 0).is_empty());
    }

    #[test]
    fn bucket_sizes_differ_by_at_most_one() {
        let buckets = distribute((0..23).collect(), 5);
        let sizes: Vec<_> = buckets.iter().map(Vec::len).collect();
        assert_eq!(sizes, [5, 5, 5, 4, 4]);
    }
}
