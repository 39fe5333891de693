//! Round orchestration
pub mod engine;
pub mod feedback;
pub mod schedule;

pub use self::engine::{EvolutionController, RoundReport, RunSummary};
pub use self::feedback::summarize;
pub use self::schedule::RoundSchedule;
