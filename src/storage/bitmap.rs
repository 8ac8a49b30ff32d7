//! Completion bitmap
//!
//! A fixed-length set of piece indices backed by a `BitVec`. Range
//! cardinality is a popcount over a bit slice, so counting the completed
//! pieces of a large file never walks it piece by piece.

use std::ops::Range;

use bitvec::prelude::*;

/// Set of piece indices, typically the pieces that passed verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    bits: BitVec,
}

impl Bitmap {
    /// Creates an empty bitmap able to hold indices `0..len`
    pub fn new(len: usize) -> Self {
        Self {
            bits: bitvec![0; len],
        }
    }

    /// Number of indices the bitmap can hold
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns true if `index` is set. Out of range indices are never set.
    pub fn contains(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    /// Sets `index`, returning true if it was not set before
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.bits.len() {
            return false;
        }
        !self.bits.replace(index, true)
    }

    /// Clears `index`, returning true if it was set before
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.bits.len() {
            return false;
        }
        self.bits.replace(index, false)
    }

    /// Number of set indices
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Number of set indices within `range`, clamped to the bitmap
    pub fn count_range(&self, range: Range<usize>) -> usize {
        let end = range.end.min(self.bits.len());
        if range.start >= end {
            return 0;
        }
        self.bits[range.start..end].count_ones()
    }

    /// Iterate over set indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let bitmap = Bitmap::new(100);
        assert_eq!(bitmap.len(), 100);
        assert_eq!(bitmap.count(), 0);
        assert!(!bitmap.contains(0));
    }

    #[test]
    fn test_insert_and_remove() {
        let mut bitmap = Bitmap::new(10);
        assert!(bitmap.insert(3));
        assert!(!bitmap.insert(3));
        assert!(bitmap.contains(3));
        assert!(bitmap.remove(3));
        assert!(!bitmap.remove(3));
        assert!(!bitmap.contains(3));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut bitmap = Bitmap::new(10);
        assert!(!bitmap.insert(10));
        assert!(!bitmap.remove(10));
        assert!(!bitmap.contains(10));
        assert_eq!(bitmap.count(), 0);
    }

    #[test]
    fn test_count_range_clamps() {
        let mut bitmap = Bitmap::new(300);
        for i in (0..300).filter(|i| i % 3 == 0 || i % 7 == 0) {
            bitmap.insert(i);
        }
        for start in [0, 1, 63, 64, 65, 200] {
            for end in [0, 1, 64, 65, 299, 300, 400] {
                let naive = (start..end.min(300)).filter(|&i| bitmap.contains(i)).count();
                assert_eq!(bitmap.count_range(start..end), naive, "range {start}..{end}");
            }
        }
    }

    #[test]
    fn test_iter_in_order() {
        let mut bitmap = Bitmap::new(200);
        for i in [150, 0, 64, 63, 199] {
            bitmap.insert(i);
        }
        let set: Vec<_> = bitmap.iter().collect();
        assert_eq!(set, vec![0, 63, 64, 150, 199]);
    }

    #[test]
    fn test_clone_is_detached() {
        let mut bitmap = Bitmap::new(8);
        bitmap.insert(1);
        let snapshot = bitmap.clone();
        bitmap.insert(2);
        assert!(!snapshot.contains(2));
        assert_eq!(snapshot.count(), 1);
    }
}
