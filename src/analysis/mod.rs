pub mod consecutive;
pub mod dependence;

pub use consecutive::ConsecutiveAccessDag;
pub use dependence::LocalDependenceAnalysis;
