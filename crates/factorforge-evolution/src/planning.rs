//! Direction planning
//!
//! Turns one initial research direction into `num_directions` distinct ones,
//! each of which seeds a trajectory.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use factorforge_common::{ForgeError, ProposalOracle};

use crate::config::PlanningSettings;

/// Angles used to derive directions when the oracle cannot provide them
pub const FALLBACK_ANGLES: &[&str] = &[
    "momentum and trend persistence",
    "short-term mean reversion",
    "volume and liquidity dynamics",
    "volatility structure",
    "price-volume divergence",
    "intraday range and gaps",
];

/// Deterministic variant `index` of `initial`
pub fn fallback_direction(initial: &str, index: usize) -> String {
    let angle = FALLBACK_ANGLES[index % FALLBACK_ANGLES.len()];
    let cycle = index / FALLBACK_ANGLES.len();
    if cycle == 0 {
        format!("{} (angle: {})", initial, angle)
    } else {
        format!("{} (angle: {}, variant {})", initial, angle, cycle + 1)
    }
}

pub struct DirectionPlanner {
    oracle: Arc<dyn ProposalOracle>,
    settings: PlanningSettings,
}

impl DirectionPlanner {
    pub fn new(oracle: Arc<dyn ProposalOracle>, settings: PlanningSettings) -> Self {
        Self { oracle, settings }
    }

    /// Exactly `num_directions` distinct directions.
    ///
    /// # Errors
    ///
    /// When the oracle fails or comes up short and fallback is disabled.
    pub async fn plan(&self) -> Result<Vec<String>, ForgeError> {
        let initial = self.settings.initial_direction.trim();
        let count = self.settings.num_directions.max(1);
        if count == 1 {
            return Ok(vec![initial.to_string()]);
        }

        let mut directions = Vec::with_capacity(count);
        let mut seen = HashSet::new();

        if self.settings.use_oracle {
            match self.oracle.plan_directions(initial, count).await {
                Ok(proposed) => {
                    for direction in proposed {
                        let direction = direction.trim().to_string();
                        if !direction.is_empty() && seen.insert(direction.to_lowercase()) {
                            directions.push(direction);
                        }
                        if directions.len() == count {
                            break;
                        }
                    }
                }
                Err(err) if self.settings.allow_fallback => {
                    warn!(error = %err, "Direction planning failed, using fallback directions");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if directions.len() < count {
            if !self.settings.allow_fallback {
                return Err(ForgeError::Config(format!(
                    "planning produced {} of {} directions and fallback is disabled",
                    directions.len(),
                    count
                )));
            }
            let mut index = 0;
            while directions.len() < count {
                let direction = fallback_direction(initial, index);
                if seen.insert(direction.to_lowercase()) {
                    directions.push(direction);
                }
                index += 1;
            }
        }

        info!(count = directions.len(), "Planned research directions");
        Ok(directions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use factorforge_common::{FactorSpec, OracleError, ProposalContext};

    struct FixedPlanner(Result<Vec<String>, OracleError>);

    #[async_trait]
    impl ProposalOracle for FixedPlanner {
        async fn propose(&self, _context: &ProposalContext) -> Result<FactorSpec, OracleError> {
            Err(OracleError::Refused("planning only".into()))
        }

        async fn verify(&self, _spec: &FactorSpec) -> Result<String, OracleError> {
            Err(OracleError::Refused("planning only".into()))
        }

        async fn plan_directions(
            &self,
            _initial: &str,
            _count: usize,
        ) -> Result<Vec<String>, OracleError> {
            self.0.clone()
        }
    }

    fn settings(count: usize, allow_fallback: bool) -> PlanningSettings {
        PlanningSettings {
            initial_direction: "liquidity premia".into(),
            num_directions: count,
            use_oracle: true,
            allow_fallback,
        }
    }

    #[tokio::test]
    async fn test_single_direction_skips_oracle() {
        let planner = DirectionPlanner::new(
            Arc::new(FixedPlanner(Err(OracleError::Unavailable("down".into())))),
            settings(1, false),
        );
        assert_eq!(planner.plan().await.unwrap(), vec!["liquidity premia"]);
    }

    #[tokio::test]
    async fn test_short_oracle_output_is_filled() {
        let planner = DirectionPlanner::new(
            Arc::new(FixedPlanner(Ok(vec![
                "Turnover shocks".into(),
                "turnover shocks ".into(),
                "".into(),
            ]))),
            settings(3, true),
        );
        let directions = planner.plan().await.unwrap();
        assert_eq!(directions.len(), 3);
        assert_eq!(directions[0], "Turnover shocks");
        assert_eq!(directions[1], fallback_direction("liquidity premia", 0));
    }

    #[tokio::test]
    async fn test_failure_without_fallback() {
        let planner = DirectionPlanner::new(
            Arc::new(FixedPlanner(Err(OracleError::Unavailable("down".into())))),
            settings(2, false),
        );
        assert!(matches!(planner.plan().await, Err(ForgeError::Oracle(_))));
    }

    #[test]
    fn test_fallback_variants_are_distinct() {
        let all: HashSet<String> = (0..20).map(|i| fallback_direction("x", i)).collect();
        assert_eq!(all.len(), 20);
    }
}
