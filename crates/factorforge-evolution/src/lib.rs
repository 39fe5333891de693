//! # FactorForge Evolution
//!
//! Round-based evolution of factor trajectories on top of the quality gate.
//!
//! ## Round Cycle
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  EvolutionController                      │
//! │                                                           │
//! │  plan jobs ──► propose ─► gate ─► backtest ─► feedback    │
//! │  (per trajectory, bounded parallelism)        │           │
//! │                                               ▼           │
//! │                              admit under library mutex    │
//! │                                               │           │
//! │  barrier ◄────────────────────────────────────┘           │
//! │     │                                                     │
//! │     ▼                                                     │
//! │  record in TrajectoryPool ─► close round ─► flush library │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fitness Formula
//!
//! ```text
//! η = max(RankIC, 0) × sqrt(max(RankICIR, 0))
//! ```
//!
//! ## Exhaustion Policy
//!
//! A trajectory is marked exhausted, and no longer evolves, only once it has
//! no viable head left to select as a parent.

pub mod config;
pub mod controller;
pub mod culling;
pub mod fitness;
pub mod infra;
pub mod planning;
pub mod pool;

pub use config::ForgeConfig;
pub use controller::{EvolutionController, RoundReport, RoundSchedule, RunSummary};
pub use fitness::{FitnessCalculator, FitnessModel};
pub use infra::{CachedBacktest, CommandOracle, FactorLibrary, LinkStrategy, ProcessRunner};
pub use planning::DirectionPlanner;
pub use pool::{PoolMember, SelectionStrategy, Trajectory, TrajectoryPool};

/// Default number of rounds, the original round included
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Default number of trajectory cycles run concurrently
pub const DEFAULT_PARALLEL_DIRECTIONS: usize = 1;

/// Configuration file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "factorforge.toml";

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "FACTORFORGE_CONFIG";

/// Prefix of `FACTORFORGE__SECTION__KEY` overrides
pub const ENV_PREFIX: &str = "FACTORFORGE";
