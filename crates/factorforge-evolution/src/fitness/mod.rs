//! Composite fitness
pub mod calculator;

pub use self::calculator::{FitnessCalculator, FitnessModel};
