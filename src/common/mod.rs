pub mod bitset;
pub mod fx;
pub mod types;

pub use bitset::Bitset;
pub use types::IrType;
