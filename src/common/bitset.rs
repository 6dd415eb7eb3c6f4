//! A dense, word-packed bitset over a fixed universe `[0, len)`.
//!
//! Every dependence set, `elements` set and search-state set in this crate
//! (`depended`, `independent`, `free`, `usable`, `unresolved_scalars`, a
//! pack's `elements`) is keyed by the same `ValueIndex` universe and is one
//! of these. Grounded on the hand-rolled, word-packed `BitSet` rustc itself
//! uses for MIR dataflow analysis (see `librustc_mir/borrow_check` in the
//! pack's embedded rustc checkout) rather than a crate: the operations here
//! (union/intersect/popcount over a fixed universe) are a handful of lines
//! over `Vec<u64>` and the teacher's own style favors hand-rolled data
//! structures over pulling in a crate where std suffices.

const BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

fn word_count(len: usize) -> usize {
    (len + BITS - 1) / BITS
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self { words: vec![0; word_count(len)], len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty_universe(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn word_bit(i: usize) -> (usize, u64) {
        (i / BITS, 1u64 << (i % BITS))
    }

    pub fn insert(&mut self, i: usize) {
        debug_assert!(i < self.len, "bit {i} out of range for universe of size {}", self.len);
        let (w, b) = Self::word_bit(i);
        self.words[w] |= b;
    }

    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < self.len, "bit {i} out of range for universe of size {}", self.len);
        let (w, b) = Self::word_bit(i);
        self.words[w] &= !b;
    }

    pub fn set(&mut self, i: usize, value: bool) {
        if value {
            self.insert(i);
        } else {
            self.remove(i);
        }
    }

    pub fn contains(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        let (w, b) = Self::word_bit(i);
        self.words[w] & b != 0
    }

    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self |= other`
    pub fn union_with(&mut self, other: &Bitset) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// `self &= other`
    pub fn intersect_with(&mut self, other: &Bitset) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
    }

    /// `self &= !other`
    pub fn subtract(&mut self, other: &Bitset) {
        debug_assert_eq!(self.len, other.len);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= !b;
        }
    }

    pub fn union(&self, other: &Bitset) -> Bitset {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    pub fn intersection(&self, other: &Bitset) -> Bitset {
        let mut out = self.clone();
        out.intersect_with(other);
        out
    }

    pub fn difference(&self, other: &Bitset) -> Bitset {
        let mut out = self.clone();
        out.subtract(other);
        out
    }

    /// Bitwise complement within `[0, len)`; bits beyond `len` in the last
    /// word stay clear.
    pub fn complement(&self) -> Bitset {
        let mut out = self.clone();
        for w in &mut out.words {
            *w = !*w;
        }
        out.mask_trailing();
        out
    }

    fn mask_trailing(&mut self) {
        let rem = self.len % BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    pub fn is_disjoint(&self, other: &Bitset) -> bool {
        debug_assert_eq!(self.len, other.len);
        self.words.iter().zip(&other.words).all(|(a, b)| a & b == 0)
    }

    pub fn is_subset_of(&self, other: &Bitset) -> bool {
        debug_assert_eq!(self.len, other.len);
        self.words.iter().zip(&other.words).all(|(a, b)| a & !b == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..BITS).filter_map(move |bi| {
                if w & (1u64 << bi) != 0 {
                    Some(wi * BITS + bi)
                } else {
                    None
                }
            })
        })
    }

    pub fn from_iter(len: usize, bits: impl IntoIterator<Item = usize>) -> Bitset {
        let mut out = Bitset::new(len);
        for b in bits {
            out.insert(b);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_insert_contains() {
        let mut bs = Bitset::new(130);
        bs.insert(0);
        bs.insert(63);
        bs.insert(64);
        bs.insert(129);
        assert!(bs.contains(0) && bs.contains(63) && bs.contains(64) && bs.contains(129));
        assert!(!bs.contains(1));
        assert_eq!(bs.count(), 4);
    }

    #[test]
    fn union_intersect_subtract() {
        let a = Bitset::from_iter(8, [0, 1, 2]);
        let b = Bitset::from_iter(8, [2, 3, 4]);
        assert_eq!(a.union(&b).iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(a.intersection(&b).iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(a.difference(&b).iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn complement_masks_trailing_bits() {
        let a = Bitset::new(5);
        let comp = a.complement();
        assert_eq!(comp.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn subset_and_disjoint() {
        let a = Bitset::from_iter(8, [0, 1]);
        let b = Bitset::from_iter(8, [0, 1, 2, 3]);
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        let c = Bitset::from_iter(8, [4, 5]);
        assert!(a.is_disjoint(&c));
        assert!(!a.is_disjoint(&b));
    }
}
