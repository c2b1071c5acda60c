/// A fixed-size bit set over topological positions.
///
/// Used during plan compilation to hold "reachable from" sets for the
/// transitive reduction.
#[derive(Debug, Clone)]
pub(crate) struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    #[inline]
    pub(crate) fn insert(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    #[inline]
    pub(crate) fn contains(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    pub(crate) fn union_with(&mut self, other: &Self) {
        debug_assert_eq!(self.words.len(), other.words.len(), "BitSet::union_with");
        for (lhs, rhs) in self.words.iter_mut().zip(&other.words) {
            *lhs |= rhs;
        }
    }
}
