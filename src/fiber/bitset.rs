//! Fixed-length bitset over fiber slot indices.

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone)]
pub(crate) struct SlotBitset {
    words: Box<[u64]>,
    len: usize,
}

impl SlotBitset {
    pub(crate) fn empty(len: usize) -> Self {
        let words = vec![0u64; len.div_ceil(WORD_BITS)].into_boxed_slice();
        Self { words, len }
    }

    pub(crate) fn full(len: usize) -> Self {
        let mut set = Self::empty(len);
        for (i, word) in set.words.iter_mut().enumerate() {
            let remaining = len - i * WORD_BITS;
            *word = if remaining >= WORD_BITS {
                u64::MAX
            } else {
                (1u64 << remaining) - 1
            };
        }
        set
    }

    /// Clears and returns the lowest set bit, scanning word by word.
    pub(crate) fn take_first(&mut self) -> Option<usize> {
        for (i, word) in self.words.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                *word &= !(1u64 << bit);
                return Some(i * WORD_BITS + bit);
            }
        }
        None
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Sets `index`, returning whether it was previously clear.
    pub(crate) fn insert(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clears `index`, returning whether it was previously set.
    pub(crate) fn remove(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    pub(crate) fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
