//! Construction-time error handling. Per spec §7, everything *inside* a
//! search run is either an assertion (broken invariant — a programmer
//! error, not something a caller recovers from) or an empty result (no
//! seeds found, no feasible extension, a cancelled policy). The only
//! `Result`-shaped surface in this crate is validating configuration and
//! catalog entries before a `Packer` is built.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackerError {
    #[error("max_num_lanes must be a power of two in [2, 32], got {0}")]
    InvalidMaxLanes(u32),

    #[error("num_threads must be at least 1 when use_mcts policy guidance is enabled")]
    InvalidThreadCount,

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("instruction binding {name:?} requires feature {feature:?} not present on target")]
    UnsupportedBinding { name: String, feature: String },

    #[error("instruction binding {0:?} declares an empty lane signature")]
    EmptyLaneSignature(String),
}

pub type Result<T> = std::result::Result<T, PackerError>;
