//! Fast, non-cryptographic hash maps/sets used throughout the packer for
//! per-block scratch tables (dependence maps, pack interning, memo tables).
//! Block-local, never exposed across threads, so the weaker hash is safe.

pub use rustc_hash::{FxHashMap, FxHashSet};
