//! Pure partitioning math behind block compaction.
//!
//! Blocks are leveled LSM-style: newest-first, lengths non-decreasing from
//! newest to oldest, each level roughly a growth multiple larger than its
//! younger neighbor. [`compress`] merges partitions until the count fits a
//! budget, and [`repartition`] restores the leveling invariant after each
//! merge. Everything here is pure; no I/O and no archive state.

use tracing::debug;

/// A contiguous run of block indices with their combined referenced length.
///
/// `start..=end` index into the archive's newest-first block list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    start: usize,
    end: usize,
    length: u64,
}

impl Partition {
    pub fn new(start: usize, end: usize, length: u64) -> Self {
        Self { start, end, length }
    }

    /// Index of the youngest block covered.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index of the oldest block covered.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Combined referenced byte length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns `true` if the partition covers a single block.
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    fn merge_with(&self, older: &Partition) -> Partition {
        Partition::new(self.start, older.end, self.length + older.length)
    }
}

/// Leveling invariant: lengths non-decreasing newest to oldest, ignoring
/// trailing zero-length partitions.
pub fn is_ordered(partitions: &[Partition]) -> bool {
    let mut lengths: Vec<u64> = partitions.iter().map(Partition::length).collect();
    while lengths.last() == Some(&0) {
        lengths.pop();
    }
    lengths.windows(2).all(|pair| pair[0] <= pair[1])
}

/// Restore the leveling invariant.
///
/// Scans newest-first for the first adjacent pair where the younger
/// partition, scaled by `multiple`, has caught up with its older neighbor,
/// merges the pair, and recurses on the remainder.
///
/// # Panics
///
/// Panics if the input is not contiguous or the result is not ordered;
/// both indicate an engine bug, not bad data.
pub fn repartition(partitions: Vec<Partition>, multiple: u64) -> Vec<Partition> {
    for index in 0..partitions.len().saturating_sub(1) {
        let current = partitions[index];
        let next = partitions[index + 1];
        if current.length() * multiple >= next.length() {
            assert!(
                next.start() >= current.end(),
                "partition plan out of order: {current:?} before {next:?}"
            );
            let mut good = partitions[..index].to_vec();
            let mut rest = partitions[index + 1..].to_vec();
            rest[0] = current.merge_with(&next);
            good.extend(repartition(rest, multiple));
            assert!(is_ordered(&good), "repartition produced disorder: {good:?}");
            return good;
        }
    }
    assert!(
        is_ordered(&partitions),
        "repartition input disordered: {partitions:?}"
    );
    partitions
}

/// Merge partitions until at most `max_len` remain.
///
/// Zero-length partitions are dropped first. While over budget, the two
/// newest partitions are merged and the leveling invariant is restored via
/// [`repartition`]. Requires `max_len >= 2` whenever merging is needed.
///
/// # Panics
///
/// Panics if merging is required with `max_len < 2`, or if the result
/// violates the leveling invariant.
pub fn compress(partitions: &[Partition], max_len: usize, multiple: u64) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = partitions
        .iter()
        .filter(|partition| partition.length() > 0)
        .copied()
        .collect();

    if partitions.len() <= max_len {
        // Doesn't repartition if it didn't compress.
        return partitions;
    }

    assert!(max_len > 1, "cannot compress to fewer than 2 partitions");

    while partitions.len() > max_len {
        let merged = partitions[0].merge_with(&partitions[1]);
        partitions[1] = merged;
        partitions = repartition(partitions[1..].to_vec(), multiple);
    }
    assert!(is_ordered(&partitions), "compress produced disorder");
    debug!(count = partitions.len(), "compressed partition plan");

    partitions
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn singles(lengths: &[u64]) -> Vec<Partition> {
        lengths
            .iter()
            .enumerate()
            .map(|(index, &length)| Partition::new(index, index, length))
            .collect()
    }

    #[test]
    fn ordered_ignores_trailing_zeros() {
        assert!(is_ordered(&singles(&[1, 2, 4, 0, 0])));
        assert!(is_ordered(&singles(&[])));
        assert!(is_ordered(&singles(&[5])));
        assert!(!is_ordered(&singles(&[4, 2, 8])));
        assert!(!is_ordered(&singles(&[1, 0, 8])));
    }

    #[test]
    fn repartition_leaves_leveled_input_alone() {
        let input = singles(&[1, 3, 9]);
        assert_eq!(repartition(input.clone(), 2), input);
    }

    #[test]
    fn repartition_merges_caught_up_neighbor() {
        // 4 * 2 >= 6, so the two newest levels merge.
        let result = repartition(singles(&[4, 6, 100]), 2);
        assert_eq!(
            result,
            vec![Partition::new(0, 1, 10), Partition::new(2, 2, 100)]
        );
    }

    #[test]
    fn repartition_cascades() {
        // Merging 1+1 makes 2, which catches 2, and so on up the levels.
        let result = repartition(singles(&[1, 1, 2, 4, 100]), 2);
        assert_eq!(
            result,
            vec![Partition::new(0, 3, 8), Partition::new(4, 4, 100)]
        );
    }

    #[test]
    fn compress_within_budget_is_identity_minus_zeros() {
        let result = compress(&singles(&[3, 0, 7, 9]), 4, 2);
        assert_eq!(
            result,
            vec![
                Partition::new(0, 0, 3),
                Partition::new(2, 2, 7),
                Partition::new(3, 3, 9),
            ]
        );
    }

    #[test]
    fn compress_merges_down_to_budget() {
        let result = compress(&singles(&[1, 2, 4, 8, 16, 32]), 4, 2);
        assert!(result.len() <= 4);
        assert!(is_ordered(&result));
        // Every input byte is still covered.
        let total: u64 = result.iter().map(Partition::length).sum();
        assert_eq!(total, 63);
    }

    #[test]
    fn compress_covers_all_blocks_contiguously() {
        let result = compress(&singles(&[10, 10, 10, 10, 10, 10]), 2, 2);
        assert!(result.len() <= 2);
        assert_eq!(result.first().unwrap().start(), 0);
        assert_eq!(result.last().unwrap().end(), 5);
    }

    #[test]
    #[should_panic(expected = "fewer than 2")]
    fn compress_to_one_partition_panics_when_merging_needed() {
        compress(&singles(&[1, 2, 3]), 1, 2);
    }

    #[test]
    fn compress_within_budget_keeps_unordered_input_as_is() {
        // No merge means no repartition; disorder passes through untouched.
        let input = singles(&[1086, 1]);
        assert_eq!(compress(&input, 2, 2), input);
    }

    proptest! {
        #[test]
        fn compress_is_ordered_and_bounded(
            mut lengths in proptest::collection::vec(0u64..10_000, 0..12),
            max_len in 2usize..6,
            multiple in 2u64..4,
        ) {
            // Within-budget input is returned as-is, so ordering on the way
            // out requires ordering on the way in. Block lists satisfy that
            // already; leveled input is the precondition, not a special case.
            lengths.sort_unstable();
            let input = singles(&lengths);
            let result = compress(&input, max_len, multiple);

            prop_assert!(result.len() <= max_len);
            prop_assert!(is_ordered(&result));

            let total_in: u64 = lengths.iter().sum();
            let total_out: u64 = result.iter().map(Partition::length).sum();
            prop_assert_eq!(total_in, total_out);
        }
    }
}
