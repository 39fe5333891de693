//! Infrastructure: persistence, caching and external processes
pub mod backtest_cache;
pub mod command_oracle;
pub mod factor_library;
pub mod persist;
pub mod process;

pub use self::backtest_cache::{CacheStats, CachedBacktest};
pub use self::command_oracle::CommandOracle;
pub use self::factor_library::FactorLibrary;
pub use self::persist::{read_json, write_json_atomic};
pub use self::process::{LinkStrategy, ProcessError, ProcessOutput, ProcessRunner, ShellStrategy};
