//! FactorForge mining binary
//!
//! Usage: `factorforge [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use factorforge_common::{BacktestOracle, ProposalOracle, VERSION};
use factorforge_evolution::{
    CachedBacktest, CommandOracle, DirectionPlanner, EvolutionController, ForgeConfig,
    LinkStrategy, ProcessRunner,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting FactorForge v{}", VERSION);

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ForgeConfig::load(config_path.as_deref())?;
    info!(
        max_rounds = config.evolution.max_rounds,
        directions = config.planning.num_directions,
        parallel = config.evolution.parallel_directions,
        selection = %config.evolution.parent_selection,
        library = %config.library_path.display(),
        "Loaded configuration"
    );

    let mut runner = ProcessRunner::new(config.oracle.call_timeout());
    if let Some(workspace) = &config.oracle.workspace_dir {
        std::fs::create_dir_all(workspace)
            .with_context(|| format!("creating workspace {}", workspace.display()))?;
        if let Some(data_dir) = &config.oracle.data_dir {
            let staged = LinkStrategy::native()
                .stage(data_dir, workspace)
                .with_context(|| format!("staging {}", data_dir.display()))?;
            info!(data = %staged.display(), "Staged market data");
        }
        runner = runner.with_working_dir(workspace);
    }

    let proposal_command = config
        .oracle
        .proposal_command
        .clone()
        .context("oracle.proposal_command is not configured")?;
    let backtest_command = config
        .oracle
        .backtest_command
        .clone()
        .context("oracle.backtest_command is not configured")?;

    let proposer: Arc<dyn ProposalOracle> =
        Arc::new(CommandOracle::new(proposal_command, runner.clone()));
    let backtest = CommandOracle::new(backtest_command, runner);
    let backtester: Arc<dyn BacktestOracle> = if config.backtest.cache_enabled {
        Arc::new(CachedBacktest::new(backtest))
    } else {
        Arc::new(backtest)
    };

    let mut controller =
        EvolutionController::from_config(&config, Arc::clone(&proposer), backtester)?;
    // a resumed pool already carries its directions
    let directions = match controller.resume().await? {
        Some(round) => {
            info!(round, "Continuing from checkpoint");
            Vec::new()
        }
        None => DirectionPlanner::new(proposer, config.planning.clone())
            .plan()
            .await?,
    };
    for (i, direction) in directions.iter().enumerate() {
        info!(index = i, %direction, "Research direction");
    }
    let summary = controller
        .run_with_timeout(&directions, config.run_timeout())
        .await?;

    if summary.timed_out {
        warn!(
            rounds = summary.rounds_completed(),
            library_size = summary.library_size,
            "Run timed out; admitted factors were flushed"
        );
    }
    info!(
        rounds = summary.rounds_completed(),
        admitted = summary.admitted(),
        rejected = summary.rejected(),
        exhausted = summary.exhausted.len(),
        library_size = summary.library_size,
        "FactorForge finished"
    );

    Ok(())
}
