//! `PackerConfig` (spec §6): every knob the search exposes to a host, each
//! with a default. Per A.4 of `SPEC_FULL.md` this is a plain struct built
//! programmatically — no `clap`, no config file — the same shape as the
//! teacher's own `backend::Target`/codegen option structs threaded through
//! function calls rather than parsed inside the crate.

use crate::error::{PackerError, Result};

/// Search configuration (spec §6 table). Validated once at `Packer`
/// construction time (spec §7: "the only `Result`-shaped surface ... is
/// validating configuration").
#[derive(Debug, Clone)]
pub struct PackerConfig {
    /// Upper bound on pack lane count. Must be a power of two in `[2, 32]`.
    pub max_num_lanes: u32,
    /// MCTS iterations per root.
    pub num_simulations: u32,
    /// UCT exploration constant.
    pub c: f64,
    /// Prior weight multiplier.
    pub w: f64,
    /// Visits before a leaf is expanded.
    pub expand_after: u32,
    /// Max separation between co-packable instructions (bounds how far
    /// back extension-pack search looks from an unresolved operand pack).
    pub max_search_dist: usize,
    /// Max packs enumerated per block.
    pub enum_cap: usize,
    /// Choose MCTS vs the DP improver.
    pub use_mcts: bool,
    /// Policy pool batch size.
    pub batch_size: usize,
    /// Policy pool thread count.
    pub num_threads: usize,
    /// Whether to run the optional load-coalescing pass (spec §4.6).
    pub coalesce_loads: bool,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            max_num_lanes: 16,
            num_simulations: 1_000,
            c: 2.0,
            w: 1.0,
            expand_after: 4,
            max_search_dist: 64,
            enum_cap: 10_000,
            use_mcts: true,
            batch_size: 16,
            num_threads: 2,
            coalesce_loads: true,
        }
    }
}

impl PackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_num_lanes < 2 || self.max_num_lanes > 32 || !self.max_num_lanes.is_power_of_two() {
            return Err(PackerError::InvalidMaxLanes(self.max_num_lanes));
        }
        if self.use_mcts && self.num_threads == 0 {
            return Err(PackerError::InvalidThreadCount);
        }
        if self.batch_size == 0 {
            return Err(PackerError::InvalidBatchSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PackerConfig::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_lanes_rejected() {
        let mut cfg = PackerConfig::default();
        cfg.max_num_lanes = 6;
        assert_eq!(cfg.validate(), Err(PackerError::InvalidMaxLanes(6)));
    }

    #[test]
    fn zero_threads_with_mcts_rejected() {
        let mut cfg = PackerConfig::default();
        cfg.num_threads = 0;
        assert_eq!(cfg.validate(), Err(PackerError::InvalidThreadCount));
    }
}
