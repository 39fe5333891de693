//! Trajectory pool and parent selection

pub mod registry;
pub mod selection;
pub mod trajectory;

pub use registry::{PoolSnapshot, TrajectoryPool};
pub use selection::SelectionStrategy;
pub use trajectory::{PoolMember, Trajectory};
