/// Maps a global entry index of a file chain onto (file, local index).
///
/// Stores the cumulative entry count at the end of every file, so lookups are a
/// binary search over a monotonic vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainIndex {
    ends: Vec<u64>,
}

impl ChainIndex {
    pub fn from_counts(counts: &[u64]) -> Self {
        let mut ends = Vec::with_capacity(counts.len());
        let mut total = 0u64;
        for &count in counts {
            total += count;
            ends.push(total);
        }
        ChainIndex { ends }
    }

    pub fn num_files(&self) -> usize {
        self.ends.len()
    }

    pub fn total(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    /// Cumulative entry counts at the end of each file.
    pub fn boundaries(&self) -> &[u64] {
        &self.ends
    }

    pub fn file_start(&self, file: usize) -> u64 {
        if file == 0 { 0 } else { self.ends[file - 1] }
    }

    pub fn file_count(&self, file: usize) -> u64 {
        self.ends[file] - self.file_start(file)
    }

    /// Returns `(file index, index within that file)`, or None past the end of the chain.
    pub fn locate(&self, global: u64) -> Option<(usize, u64)> {
        if global >= self.total() {
            return None;
        }
        let file = self.ends.partition_point(|&end| end <= global);
        Some((file, global - self.file_start(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_two_files() {
        let index = ChainIndex::from_counts(&[100, 50]);
        assert_eq!(index.total(), 150);
        assert_eq!(index.locate(0), Some((0, 0)));
        assert_eq!(index.locate(99), Some((0, 99)));
        assert_eq!(index.locate(100), Some((1, 0)));
        assert_eq!(index.locate(149), Some((1, 49)));
        assert_eq!(index.locate(150), None);
    }

    #[test]
    fn test_locate_skips_empty_files() {
        let index = ChainIndex::from_counts(&[3, 0, 2]);
        assert_eq!(index.locate(2), Some((0, 2)));
        assert_eq!(index.locate(3), Some((2, 0)));
        assert_eq!(index.file_count(1), 0);
    }

    #[test]
    fn test_empty_chain() {
        let index = ChainIndex::from_counts(&[]);
        assert_eq!(index.total(), 0);
        assert_eq!(index.locate(0), None);
    }
}
