//! Core data types for FactorForge

pub mod candidate;
pub mod feedback;
pub mod metrics;
pub mod record;
