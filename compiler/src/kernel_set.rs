// kernel_set.rs — Fixed-capacity bitset over kernel ids
//
// Precursor sets and latch consumer sets are subsets of the circuit's
// kernels. Kernel ids are dense, so a word-packed bitset sized to the kernel
// count gives O(n/64) union and subset tests.

use std::fmt;

use crate::id::KernelId;

const WORD_BITS: usize = 64;

/// A set of kernels, sized for a circuit with a fixed kernel count.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KernelSet {
    words: Vec<u64>,
}

impl KernelSet {
    /// Empty set able to hold ids `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        KernelSet {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    /// Number of ids the set can hold (rounded up to whole words).
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Insert `id`. Returns `true` if it was not already present.
    pub fn insert(&mut self, id: KernelId) -> bool {
        let (word, bit) = Self::locate(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & bit != 0;
        self.words[word] |= bit;
        !was_set
    }

    pub fn contains(&self, id: KernelId) -> bool {
        let (word, bit) = Self::locate(id);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// `self ∪= other`.
    pub fn union_with(&mut self, other: &KernelSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    /// True iff every member of `self` is also in `other`.
    pub fn is_subset(&self, other: &KernelSet) -> bool {
        self.words.iter().enumerate().all(|(i, &w)| {
            let o = other.words.get(i).copied().unwrap_or(0);
            w & !o == 0
        })
    }

    /// Members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = KernelId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(KernelId((i * WORD_BITS + bit) as u32))
            })
        })
    }

    fn locate(id: KernelId) -> (usize, u64) {
        let i = id.index();
        (i / WORD_BITS, 1u64 << (i % WORD_BITS))
    }
}

impl fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Extend<KernelId> for KernelSet {
    fn extend<T: IntoIterator<Item = KernelId>>(&mut self, iter: T) {
        for id in iter {
            self.insert(id);
        }
    }
}
