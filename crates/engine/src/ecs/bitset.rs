/// Entity-indexed bitset backed by `u64` words.
///
/// Indices are raw entity ids; the set grows on `insert` and never shrinks,
/// so clearing keeps the allocation for the next tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntityBitSet {
    words: Vec<u64>,
}

impl EntityBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u32) {
        let (word, mask) = split(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= mask;
    }

    pub fn remove(&mut self, index: u32) {
        let (word, mask) = split(index);
        if let Some(bits) = self.words.get_mut(word) {
            *bits &= !mask;
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        let (word, mask) = split(index);
        self.words
            .get(word)
            .map(|bits| bits & mask != 0)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|bits| *bits == 0)
    }

    pub fn len(&self) -> usize {
        self.words
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum()
    }

    /// Zeroes every word without releasing capacity.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn copy_from(&mut self, other: &EntityBitSet) {
        self.clear();
        self.union_with(other);
    }

    pub fn union_with(&mut self, other: &EntityBitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (bits, other_bits) in self.words.iter_mut().zip(&other.words) {
            *bits |= other_bits;
        }
    }

    pub fn difference_with(&mut self, other: &EntityBitSet) {
        for (bits, other_bits) in self.words.iter_mut().zip(&other.words) {
            *bits &= !other_bits;
        }
    }

    pub fn intersect_with(&mut self, other: &EntityBitSet) {
        let shared = self.words.len().min(other.words.len());
        for (bits, other_bits) in self.words[..shared].iter_mut().zip(&other.words) {
            *bits &= other_bits;
        }
        for bits in &mut self.words[shared..] {
            *bits = 0;
        }
    }

    pub fn is_disjoint(&self, other: &EntityBitSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(bits, other_bits)| bits & other_bits == 0)
    }

    pub fn iter(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Ascending iterator over set indices.
pub struct Ones<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some((self.word_index * 64) as u32 + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

fn split(index: u32) -> (usize, u64) {
    ((index / 64) as usize, 1u64 << (index % 64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(indices: &[u32]) -> EntityBitSet {
        let mut set = EntityBitSet::new();
        for index in indices {
            set.insert(*index);
        }
        set
    }

    #[test]
    fn insert_grows_and_contains_reports_membership() {
        let set = set_of(&[3, 64, 200]);
        assert!(set.contains(3));
        assert!(set.contains(64));
        assert!(set.contains(200));
        assert!(!set.contains(4));
        assert!(!set.contains(10_000));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn iter_yields_ascending_indices_across_words() {
        let set = set_of(&[130, 0, 63, 64]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 63, 64, 130]);
    }

    #[test]
    fn set_algebra_matches_expectations() {
        let mut a = set_of(&[1, 2, 3, 100]);
        let b = set_of(&[2, 100, 300]);

        let mut intersection = a.clone();
        intersection.intersect_with(&b);
        assert_eq!(intersection.iter().collect::<Vec<_>>(), vec![2, 100]);

        a.difference_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(a.is_disjoint(&b));

        a.union_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 3, 100, 300]);
    }

    #[test]
    fn clear_keeps_capacity_and_empties() {
        let mut set = set_of(&[500]);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.iter().next(), None);
        assert_eq!(set.words.len(), 8);
    }
}
