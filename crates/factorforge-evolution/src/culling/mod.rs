//! Trajectory exhaustion
pub mod policy;

pub use self::policy::ExhaustionPolicy;
