//! FactorForge configuration
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! then `FACTORFORGE__SECTION__KEY` environment variables.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use factorforge_common::{BacktestPeriod, ForgeError};
use factorforge_gate::GateConfig;

use crate::fitness::{FitnessCalculator, FitnessModel};
use crate::pool::SelectionStrategy;

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub gate: GateConfig,
    pub evolution: EvolutionSettings,
    pub planning: PlanningSettings,
    pub backtest: BacktestSettings,
    pub oracle: OracleSettings,
    /// Library document location
    pub library_path: PathBuf,
    /// Pool snapshot written after every committed round
    pub checkpoint_path: Option<PathBuf>,
    /// Wall-clock limit for the whole mining run
    pub run_timeout_secs: Option<u64>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            evolution: EvolutionSettings::default(),
            planning: PlanningSettings::default(),
            backtest: BacktestSettings::default(),
            oracle: OracleSettings::default(),
            library_path: PathBuf::from(factorforge_common::DEFAULT_LIBRARY_FILE),
            checkpoint_path: None,
            run_timeout_secs: None,
        }
    }
}

impl ForgeConfig {
    /// Load configuration from `.env`, a TOML file and the environment.
    ///
    /// The file is `path` if given, else `$FACTORFORGE_CONFIG`, else
    /// `factorforge.toml`; a missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ForgeError> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(crate::CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(crate::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ForgeError::Config(e.to_string()))?;

        let cfg: ForgeConfig = settings
            .try_deserialize()
            .map_err(|e| ForgeError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ForgeError> {
        self.gate.validate()?;
        if self.evolution.max_rounds == 0 {
            return Err(ForgeError::Config("max_rounds must be at least 1".to_string()));
        }
        if self.evolution.parallel_directions == 0 {
            return Err(ForgeError::Config(
                "parallel_directions must be at least 1".to_string(),
            ));
        }
        if self.planning.num_directions == 0 {
            return Err(ForgeError::Config(
                "num_directions must be at least 1".to_string(),
            ));
        }
        if self.backtest.start > self.backtest.end {
            return Err(ForgeError::Config(format!(
                "backtest start {} is after end {}",
                self.backtest.start, self.backtest.end
            )));
        }
        FitnessCalculator::new(self.evolution.fitness.clone())?;
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Round loop and parent selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionSettings {
    /// Rounds including the original round
    pub max_rounds: u32,
    pub mutation_enabled: bool,
    pub crossover_enabled: bool,
    pub parent_selection: SelectionStrategy,
    /// Seed for random and weighted selection
    pub selection_seed: Option<u64>,
    /// Trajectory cycles run concurrently; 1 is sequential
    pub parallel_directions: usize,
    /// Crossover children per round; defaults to half the active trajectories
    pub crossover_pairs: Option<usize>,
    /// Extra attempts for retryable oracle failures
    pub oracle_retries: u32,
    pub fitness: FitnessModel,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            max_rounds: crate::DEFAULT_MAX_ROUNDS,
            mutation_enabled: true,
            crossover_enabled: true,
            parent_selection: SelectionStrategy::Best,
            selection_seed: None,
            parallel_directions: crate::DEFAULT_PARALLEL_DIRECTIONS,
            crossover_pairs: None,
            oracle_retries: factorforge_gate::DEFAULT_ORACLE_RETRIES,
            fitness: FitnessModel::default(),
        }
    }
}

/// Direction planning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSettings {
    pub initial_direction: String,
    pub num_directions: usize,
    /// Ask the proposal oracle for directions
    pub use_oracle: bool,
    /// Fill missing directions with deterministic variants
    pub allow_fallback: bool,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            initial_direction: "price-volume factors with economic intuition".to_string(),
            num_directions: 1,
            use_oracle: true,
            allow_fallback: true,
        }
    }
}

/// Backtest window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub cache_enabled: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            cache_enabled: true,
        }
    }
}

impl BacktestSettings {
    pub fn period(&self) -> BacktestPeriod {
        BacktestPeriod::new(self.start, self.end)
    }
}

/// External oracle commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Command implementing propose / verify / plan_directions
    pub proposal_command: Option<String>,
    /// Command implementing evaluate
    pub backtest_command: Option<String>,
    pub call_timeout_secs: u64,
    /// Market data staged into `workspace_dir` before the run
    pub data_dir: Option<PathBuf>,
    /// Working directory of oracle commands
    pub workspace_dir: Option<PathBuf>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            proposal_command: None,
            backtest_command: None,
            call_timeout_secs: factorforge_common::DEFAULT_ORACLE_TIMEOUT_SECS,
            data_dir: None,
            workspace_dir: None,
        }
    }
}

impl OracleSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
