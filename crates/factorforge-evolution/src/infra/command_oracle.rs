//! Oracles backed by external commands
//!
//! Each call runs the configured command line through [`ProcessRunner`],
//! writes one JSON request to its stdin and reads one JSON document from its
//! stdout. Tools may log freely before the document; the last line that
//! parses is taken as the response.
//!
//! Requests carry an `action` tag:
//!
//! | action            | payload                     | response                        |
//! |-------------------|-----------------------------|---------------------------------|
//! | `propose`         | `context`                   | factor spec object              |
//! | `verify`          | `factor`                    | free text or verdict object     |
//! | `plan_directions` | `initial`, `count`          | `["..."]` or `{"directions":[]}`|
//! | `evaluate`        | `expression`, `period`      | metrics object (`IC`, `RankIC`) |

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use factorforge_common::{
    BacktestMetrics, BacktestOracle, BacktestPeriod, EvaluationError, FactorSpec, OracleError,
    ProposalContext, ProposalOracle,
};

use super::process::{ProcessError, ProcessRunner};

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum OracleRequest<'a> {
    Propose {
        context: &'a ProposalContext,
    },
    Verify {
        factor: &'a FactorSpec,
    },
    PlanDirections {
        initial: &'a str,
        count: usize,
    },
    Evaluate {
        expression: &'a str,
        period: &'a BacktestPeriod,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectionList {
    Bare(Vec<String>),
    Wrapped { directions: Vec<String> },
}

/// Oracle that shells out to a command per call
pub struct CommandOracle {
    command: String,
    runner: ProcessRunner,
}

impl CommandOracle {
    pub fn new(command: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            command: command.into(),
            runner,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn call(&self, request: &OracleRequest<'_>) -> Result<String, ProcessError> {
        let body = serde_json::to_vec(request).map_err(|e| ProcessError::Io(e.to_string()))?;
        let output = self.runner.run(&self.command, Some(&body)).await?;
        debug!(
            command = %self.command,
            elapsed_ms = output.elapsed.as_millis() as u64,
            bytes = output.stdout.len(),
            "Oracle command finished"
        );
        Ok(output.stdout)
    }
}

/// Parse the whole output, or else the last line that parses on its own
pub(crate) fn extract_json<T: DeserializeOwned>(stdout: &str) -> Result<T, String> {
    let trimmed = stdout.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(whole) => trimmed
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{') || line.starts_with('['))
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| whole.to_string()),
    }
}

impl From<ProcessError> for OracleError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { elapsed_ms } => OracleError::Timeout { elapsed_ms },
            other => OracleError::Unavailable(other.to_string()),
        }
    }
}

impl From<ProcessError> for EvaluationError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { elapsed_ms } => EvaluationError::Timeout { elapsed_ms },
            other => EvaluationError::Failed(other.to_string()),
        }
    }
}

#[async_trait]
impl ProposalOracle for CommandOracle {
    #[instrument(skip(self, context), fields(trajectory = %context.trajectory_id, round = context.round))]
    async fn propose(&self, context: &ProposalContext) -> Result<FactorSpec, OracleError> {
        let stdout = self.call(&OracleRequest::Propose { context }).await?;
        extract_json(&stdout).map_err(OracleError::InvalidResponse)
    }

    async fn verify(&self, spec: &FactorSpec) -> Result<String, OracleError> {
        Ok(self.call(&OracleRequest::Verify { factor: spec }).await?)
    }

    async fn plan_directions(&self, initial: &str, count: usize) -> Result<Vec<String>, OracleError> {
        let stdout = self
            .call(&OracleRequest::PlanDirections { initial, count })
            .await?;
        match extract_json(&stdout).map_err(OracleError::InvalidResponse)? {
            DirectionList::Bare(directions) | DirectionList::Wrapped { directions } => Ok(directions),
        }
    }
}

#[async_trait]
impl BacktestOracle for CommandOracle {
    #[instrument(skip(self, period))]
    async fn evaluate(
        &self,
        expression: &str,
        period: &BacktestPeriod,
    ) -> Result<BacktestMetrics, EvaluationError> {
        let stdout = self
            .call(&OracleRequest::Evaluate { expression, period })
            .await?;
        let metrics: BacktestMetrics =
            extract_json(&stdout).map_err(EvaluationError::InvalidOutput)?;
        if metrics.is_empty() {
            return Err(EvaluationError::NoData {
                expression: expression.to_string(),
                period: period.to_string(),
            });
        }
        Ok(metrics.with_derived_calmar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[test]
    fn test_extract_json_skips_log_lines() {
        let stdout = "loading data...\n{\"RankIC\": 0.05, \"IR\": 0.7}\n";
        let metrics: BacktestMetrics = extract_json(stdout).unwrap();
        assert_eq!(metrics.rank_ic, Some(0.05));
        assert!(extract_json::<BacktestMetrics>("no json here").is_err());
    }

    #[test]
    fn test_request_shape() {
        let period = BacktestPeriod::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        );
        let json = serde_json::to_value(OracleRequest::Evaluate {
            expression: "RANK($close)",
            period: &period,
        })
        .unwrap();
        assert_eq!(json["action"], "evaluate");
        assert_eq!(json["period"]["start"], "2021-01-01");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_backtest() {
        let oracle = CommandOracle::new(
            "cat > /dev/null; echo '{\"RankIC\": 0.04, \"ARR\": 0.2, \"MDD\": -0.1}'",
            ProcessRunner::new(Duration::from_secs(5)),
        );
        let period = BacktestPeriod::new(
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
        );
        let metrics = oracle.evaluate("RANK($close)", &period).await.unwrap();
        assert_eq!(metrics.rank_ic, Some(0.04));
        assert!((metrics.calmar_ratio.unwrap() - 2.0).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_directions_and_failures() {
        let planner = CommandOracle::new(
            "cat > /dev/null; echo '{\"directions\": [\"momentum\", \"liquidity\"]}'",
            ProcessRunner::new(Duration::from_secs(5)),
        );
        assert_eq!(
            planner.plan_directions("price action", 2).await.unwrap(),
            vec!["momentum".to_string(), "liquidity".to_string()]
        );

        let broken = CommandOracle::new("exit 1", ProcessRunner::new(Duration::from_secs(5)));
        assert!(matches!(
            broken.verify(&FactorSpec::default()).await,
            Err(OracleError::Unavailable(_))
        ));
    }
}
