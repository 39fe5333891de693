//! Evolution controller
//!
//! Drives the round state machine
//! `Original -> {Mutation, Crossover} -> ... -> Terminal`.
//!
//! Every round plans one job per eligible trajectory (or crossover pair) and
//! runs the five-step cycle for each: propose, construct (parse and gate),
//! calculate and backtest, feedback. Jobs run on a bounded worker pool and
//! are joined before anything is committed:
//!
//! - admissions are serialized on the library mutex, where redundancy is
//!   re-checked against factors admitted earlier in the same round; arrival
//!   order wins
//! - the trajectory pool is only updated after the barrier, in admission
//!   order
//! - the library file (and checkpoint) is only written when a round commits
//!   or the run times out, so a crash never leaves a partial round on disk
//!
//! A controller built with a checkpoint can [`resume`](EvolutionController::resume)
//! from the last committed round.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use factorforge_common::{
    BacktestOracle, BacktestPeriod, Directive, EvolutionPhase, FactorCandidate, FactorRecord,
    FactorSpec, FailureKind, ForgeError, Lineage, ParentFactor, PoolError, ProposalContext,
    ProposalOracle, Provenance, RejectionReason,
};
use factorforge_gate::{Regulator, RetryPolicy};

use super::feedback::summarize;
use super::schedule::RoundSchedule;
use crate::config::{EvolutionSettings, ForgeConfig};
use crate::culling::ExhaustionPolicy;
use crate::fitness::FitnessCalculator;
use crate::infra::{read_json, write_json_atomic, FactorLibrary};
use crate::pool::{PoolSnapshot, TrajectoryPool};

/// What one committed round produced
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u32,
    pub phase: EvolutionPhase,
    pub jobs: usize,
    /// Admitted candidate ids in admission order
    pub admitted: Vec<Uuid>,
    /// Failure class of every rejected candidate
    pub rejections: Vec<FailureKind>,
    /// Trajectories exhausted when the round closed
    pub exhausted: Vec<Uuid>,
}

/// Result of a mining run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rounds: Vec<RoundReport>,
    pub library_size: usize,
    pub exhausted: Vec<Uuid>,
    pub timed_out: bool,
}

impl RunSummary {
    pub fn rounds_completed(&self) -> usize {
        self.rounds.len()
    }

    pub fn admitted(&self) -> usize {
        self.rounds.iter().map(|r| r.admitted.len()).sum()
    }

    pub fn rejected(&self) -> usize {
        self.rounds.iter().map(|r| r.rejections.len()).sum()
    }
}

/// One trajectory cycle to run in a round
struct Job {
    trajectory_id: Uuid,
    direction: String,
    directive: Directive,
    lineage: Lineage,
    prior_expressions: Vec<String>,
    /// Fitness history of the owning trajectory
    history: Vec<f64>,
}

enum JobOutcome {
    Admitted {
        candidate: FactorCandidate,
        fitness: f64,
        /// Position in the library
        admission: usize,
    },
    Rejected {
        candidate: FactorCandidate,
    },
}

pub struct EvolutionController {
    settings: EvolutionSettings,
    schedule: RoundSchedule,
    policy: ExhaustionPolicy,
    fitness: FitnessCalculator,
    regulator: Regulator,
    retry: RetryPolicy,
    proposer: Arc<dyn ProposalOracle>,
    backtester: Arc<dyn BacktestOracle>,
    period: BacktestPeriod,
    library: Arc<Mutex<FactorLibrary>>,
    pool: TrajectoryPool,
    checkpoint_path: Option<PathBuf>,
    reports: Vec<RoundReport>,
    committed_round: Option<u32>,
    experiment_id: Uuid,
}

impl EvolutionController {
    pub fn new(
        settings: EvolutionSettings,
        regulator: Regulator,
        proposer: Arc<dyn ProposalOracle>,
        backtester: Arc<dyn BacktestOracle>,
        library: FactorLibrary,
        period: BacktestPeriod,
    ) -> Result<Self, ForgeError> {
        // oracle calls made by the correction loop retry under the same policy
        let retry = RetryPolicy::linear(settings.oracle_retries);
        Ok(Self {
            schedule: RoundSchedule::new(
                settings.max_rounds,
                settings.mutation_enabled,
                settings.crossover_enabled,
            ),
            policy: ExhaustionPolicy::new(),
            fitness: FitnessCalculator::new(settings.fitness.clone())?,
            pool: TrajectoryPool::new(settings.selection_seed),
            settings,
            regulator: regulator.with_retry_policy(retry),
            retry,
            proposer,
            backtester,
            period,
            library: Arc::new(Mutex::new(library)),
            checkpoint_path: None,
            reports: Vec::new(),
            committed_round: None,
            experiment_id: Uuid::now_v7(),
        })
    }

    /// Build a controller from a loaded configuration, opening the library
    pub fn from_config(
        config: &ForgeConfig,
        proposer: Arc<dyn ProposalOracle>,
        backtester: Arc<dyn BacktestOracle>,
    ) -> Result<Self, ForgeError> {
        config.validate()?;
        let regulator = Regulator::new(config.gate.clone(), Arc::clone(&proposer));
        let library = FactorLibrary::open(&config.library_path, regulator.parser())?;
        let controller = Self::new(
            config.evolution.clone(),
            regulator,
            proposer,
            backtester,
            library,
            config.backtest.period(),
        )?;
        Ok(match &config.checkpoint_path {
            Some(path) => controller.with_checkpoint(path.clone()),
            None => controller,
        })
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Restore the trajectory pool from the checkpoint, if one was written,
    /// so the next [`run`](Self::run) continues after its round. Returns the
    /// restored round.
    ///
    /// # Errors
    ///
    /// An unreadable checkpoint, or one naming candidates the library does
    /// not hold.
    pub async fn resume(&mut self) -> Result<Option<u32>, ForgeError> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(None);
        };
        let Some(snapshot) = read_json::<PoolSnapshot>(path)? else {
            debug!(path = %path.display(), "No checkpoint yet, starting fresh");
            return Ok(None);
        };

        let round = snapshot.round;
        let pool = TrajectoryPool::restore(snapshot, self.settings.selection_seed);
        {
            let library = self.library.lock().await;
            if let Some(missing) = pool
                .member_ids()
                .find(|id| library.get_by_candidate(id).is_none())
            {
                return Err(ForgeError::Internal(format!(
                    "checkpoint {} references candidate {} missing from library",
                    path.display(),
                    missing
                )));
            }
        }

        info!(
            path = %path.display(),
            round,
            trajectories = pool.len(),
            active = pool.active().len(),
            "Resuming from checkpoint"
        );
        self.pool = pool;
        self.committed_round = Some(round);
        Ok(Some(round))
    }

    pub fn library(&self) -> Arc<Mutex<FactorLibrary>> {
        Arc::clone(&self.library)
    }

    pub fn pool(&self) -> &TrajectoryPool {
        &self.pool
    }

    pub fn reports(&self) -> &[RoundReport] {
        &self.reports
    }

    /// Id stamped on every factor this controller admits
    pub fn experiment_id(&self) -> Uuid {
        self.experiment_id
    }

    /// Create one trajectory per direction
    pub fn register_directions(&mut self, directions: &[String]) -> Vec<Uuid> {
        directions
            .iter()
            .map(|direction| self.pool.register_trajectory(direction.as_str()))
            .collect()
    }

    /// Run rounds until `max_rounds`, exhaustion or an operator-less
    /// schedule ends the experiment, then flush the library.
    ///
    /// # Errors
    ///
    /// Infrastructure failures abort the run; the library file keeps the
    /// state of the last committed round.
    pub async fn run(&mut self, directions: &[String]) -> Result<RunSummary, ForgeError> {
        if self.pool.is_empty() {
            self.register_directions(directions);
        }
        if self.pool.is_empty() {
            return Err(PoolError::Empty.into());
        }

        let start = self.committed_round.map_or(0, |round| round + 1);
        for round in start..self.schedule.max_rounds() {
            let Some(phase) = self.schedule.phase_for(round) else {
                break;
            };
            if phase != EvolutionPhase::Original && self.pool.active().is_empty() {
                info!(round, "All trajectories exhausted, stopping");
                break;
            }
            self.run_round(round, phase).await?;
        }

        self.flush().await?;
        let summary = self.summary(false).await;
        info!(
            rounds = summary.rounds_completed(),
            admitted = summary.admitted(),
            rejected = summary.rejected(),
            library_size = summary.library_size,
            "Mining run finished"
        );
        Ok(summary)
    }

    /// [`run`](Self::run) under a wall-clock limit. On expiry whatever has
    /// been admitted so far is flushed and a summary with `timed_out` set is
    /// returned.
    pub async fn run_with_timeout(
        &mut self,
        directions: &[String],
        timeout: Option<Duration>,
    ) -> Result<RunSummary, ForgeError> {
        let Some(limit) = timeout else {
            return self.run(directions).await;
        };
        let outcome = tokio::time::timeout(limit, self.run(directions)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    committed_round = ?self.committed_round,
                    "Mining run timed out, flushing admitted factors"
                );
                self.flush().await?;
                Ok(self.summary(true).await)
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_round(&mut self, round: u32, phase: EvolutionPhase) -> Result<(), ForgeError> {
        let jobs = self.plan_jobs(round, phase).await?;
        if jobs.is_empty() {
            info!(round, %phase, "No eligible parents, round has no jobs");
        }
        let participants: HashSet<Uuid> = jobs.iter().map(|job| job.trajectory_id).collect();
        let job_count = jobs.len();
        let parallel = self.settings.parallel_directions.max(1);

        let results: Vec<Result<JobOutcome, ForgeError>> = {
            let this = &*self;
            stream::iter(jobs.into_iter().map(|job| this.run_job(round, job)))
                .buffer_unordered(parallel)
                .collect()
                .await
        };

        // every job has settled; commit or abort the whole round
        let mut admitted = Vec::new();
        let mut rejections = Vec::new();
        for result in results {
            match result {
                Ok(JobOutcome::Admitted {
                    candidate,
                    fitness,
                    admission,
                }) => admitted.push((admission, candidate, fitness)),
                Ok(JobOutcome::Rejected { candidate }) => {
                    if let Some(reason) = candidate.rejection() {
                        rejections.push(reason.kind());
                    }
                }
                Err(err) => {
                    error!(round, %phase, error = %err, "Round aborted");
                    return Err(err);
                }
            }
        }

        admitted.sort_by_key(|(admission, _, _)| *admission);
        for (_, candidate, fitness) in &admitted {
            self.pool.record(candidate.trajectory_id, candidate, *fitness)?;
        }
        let exhausted = self.pool.close_round(round, &participants, &self.policy);
        self.committed_round = Some(round);
        self.flush().await?;

        metrics::counter!("factorforge_factors_admitted_total", admitted.len() as u64);
        for kind in &rejections {
            metrics::increment_counter!("factorforge_candidates_rejected_total", "kind" => kind.to_string());
        }
        info!(
            round,
            %phase,
            jobs = job_count,
            admitted = admitted.len(),
            rejected = rejections.len(),
            exhausted = exhausted.len(),
            "Round committed"
        );
        self.reports.push(RoundReport {
            round,
            phase,
            jobs: job_count,
            admitted: admitted.iter().map(|(_, c, _)| c.id).collect(),
            rejections,
            exhausted,
        });
        Ok(())
    }

    async fn plan_jobs(&mut self, round: u32, phase: EvolutionPhase) -> Result<Vec<Job>, ForgeError> {
        let shared = Arc::clone(&self.library);
        let library = shared.lock().await;
        let strategy = self.settings.parent_selection;
        let mut jobs = Vec::new();

        match phase {
            EvolutionPhase::Original => {
                for trajectory_id in self.pool.active() {
                    jobs.push(self.job(&library, trajectory_id, Directive::Explore, Lineage::Original)?);
                }
            }
            EvolutionPhase::Mutation => {
                for trajectory_id in self.pool.active() {
                    // mutation repairs the weakest head; the configured
                    // strategy drives crossover
                    let parent = match self.pool.select_mutation_target(trajectory_id, round) {
                        Ok(parent) => parent,
                        Err(PoolError::Empty) => {
                            debug!(trajectory = %trajectory_id, round, "No eligible parent");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    let record = parent_record(&library, &parent.candidate_id)?;
                    let feedback = record.feedback.clone();
                    let failure_signal = match &feedback {
                        Some(summary) => summary.failure_signal(),
                        None => format!("fitness {:.4} needs improvement", parent.fitness),
                    };
                    let directive = Directive::Mutate {
                        parent: parent_factor(record),
                        failure_signal,
                        feedback,
                    };
                    let lineage = Lineage::Mutation {
                        parent: parent.candidate_id,
                    };
                    jobs.push(self.job(&library, trajectory_id, directive, lineage)?);
                }
            }
            EvolutionPhase::Crossover => {
                let active = self.pool.active().len();
                let count = self.settings.crossover_pairs.unwrap_or((active + 1) / 2);
                for (first, second) in self.pool.select_crossover_pairs(strategy, round, count) {
                    let parents = [
                        parent_factor(parent_record(&library, &first.candidate_id)?),
                        parent_factor(parent_record(&library, &second.candidate_id)?),
                    ];
                    let lineage = Lineage::Crossover {
                        parents: [first.candidate_id, second.candidate_id],
                    };
                    // the child belongs to the fitter parent's trajectory
                    jobs.push(self.job(
                        &library,
                        first.trajectory_id,
                        Directive::Crossover { parents },
                        lineage,
                    )?);
                }
            }
        }
        Ok(jobs)
    }

    fn job(
        &self,
        library: &FactorLibrary,
        trajectory_id: Uuid,
        directive: Directive,
        lineage: Lineage,
    ) -> Result<Job, ForgeError> {
        let trajectory = self
            .pool
            .get(&trajectory_id)
            .ok_or(PoolError::UnknownTrajectory(trajectory_id))?;
        Ok(Job {
            trajectory_id,
            direction: trajectory.direction.clone(),
            directive,
            lineage,
            prior_expressions: library
                .by_trajectory(&trajectory_id)
                .iter()
                .map(|r| r.expression.clone())
                .collect(),
            history: trajectory.fitness_history(),
        })
    }

    /// The five-step cycle for one trajectory
    #[instrument(skip(self, job), fields(trajectory = %job.trajectory_id, phase = %job.lineage.phase()))]
    async fn run_job(&self, round: u32, job: Job) -> Result<JobOutcome, ForgeError> {
        let context = ProposalContext {
            trajectory_id: job.trajectory_id,
            direction: job.direction,
            round,
            directive: job.directive,
            prior_expressions: job.prior_expressions,
        };

        // 1. propose
        let proposer = &*self.proposer;
        let ctx = &context;
        let spec = self
            .retry
            .run("propose", move || async move {
                proposer.propose(ctx).await.map_err(ForgeError::from)
            })
            .await?;
        let candidate = FactorCandidate::new(job.trajectory_id, round, spec, job.lineage);

        // 2. construct: parse and gate against a snapshot of the library;
        // the regulator retries its own oracle calls in place
        let references = self.library.lock().await.references();
        let outcome = self
            .regulator
            .gate_with_corrections(candidate, &references, &context)
            .await?;
        let passed = outcome.passed();
        let mut candidate = outcome.candidate;
        if !passed {
            return Ok(JobOutcome::Rejected { candidate });
        }

        // 3-4. calculate and backtest
        let metrics = match self
            .backtester
            .evaluate(&candidate.spec.expression, &self.period)
            .await
        {
            Ok(metrics) => metrics,
            Err(err) => {
                info!(candidate = %candidate.id, error = %err, "Candidate rejected: backtest failed");
                candidate.reject(RejectionReason::Evaluation {
                    message: err.to_string(),
                })?;
                return Ok(JobOutcome::Rejected { candidate });
            }
        };

        // 5. feedback
        let fitness = self.fitness.calculate(&metrics);
        let feedback = summarize(&metrics, fitness, &job.history);
        debug!(candidate = %candidate.id, fitness, verdict = ?feedback.verdict, "Backtest feedback");
        candidate.set_metrics(metrics)?;
        candidate.set_feedback(feedback)?;

        let provenance = Provenance::new(self.experiment_id, context.direction);
        self.admit(candidate, fitness, &provenance).await
    }

    /// Serialized admission: re-check redundancy against everything admitted
    /// so far, this round included, then append
    async fn admit(
        &self,
        mut candidate: FactorCandidate,
        fitness: f64,
        provenance: &Provenance,
    ) -> Result<JobOutcome, ForgeError> {
        let ast = candidate.ast_or_parse(self.regulator.parser())?;
        let mut library = self.library.lock().await;

        let references = library.references();
        if let Some(reason) = self.regulator.recheck_redundancy(&ast, &references) {
            info!(
                candidate = %candidate.id,
                trajectory = %candidate.trajectory_id,
                kind = %reason.kind(),
                violations = ?reason.details(),
                "Candidate rejected at admission"
            );
            candidate.reject(reason)?;
            return Ok(JobOutcome::Rejected { candidate });
        }

        candidate.admit()?;
        let record = library.append(&candidate, &ast, provenance)?;
        info!(
            candidate = %candidate.id,
            factor_id = %record.factor_id,
            direction = %record.direction,
            round = candidate.round,
            fitness,
            quality = ?record.quality,
            "Factor admitted"
        );
        let admission = library.len() - 1;
        Ok(JobOutcome::Admitted {
            candidate,
            fitness,
            admission,
        })
    }

    /// Write the library and, if configured, the pool checkpoint
    async fn flush(&self) -> Result<(), ForgeError> {
        self.library.lock().await.flush()?;
        if let (Some(path), Some(round)) = (&self.checkpoint_path, self.committed_round) {
            write_json_atomic(path, &self.pool.snapshot(round))?;
            debug!(path = %path.display(), round, "Wrote pool checkpoint");
        }
        Ok(())
    }

    async fn summary(&self, timed_out: bool) -> RunSummary {
        RunSummary {
            rounds: self.reports.clone(),
            library_size: self.library.lock().await.len(),
            exhausted: self
                .pool
                .trajectories()
                .iter()
                .filter(|t| t.exhausted)
                .map(|t| t.id)
                .collect(),
            timed_out,
        }
    }
}

fn parent_record<'a>(library: &'a FactorLibrary, candidate_id: &Uuid) -> Result<&'a FactorRecord, ForgeError> {
    library
        .get_by_candidate(candidate_id)
        .ok_or_else(|| ForgeError::Internal(format!("parent {} missing from library", candidate_id)))
}

fn parent_factor(record: &FactorRecord) -> ParentFactor {
    ParentFactor {
        candidate_id: record.candidate_id,
        trajectory_id: record.trajectory_id,
        spec: FactorSpec {
            name: record.factor_name.clone(),
            hypothesis: record.hypothesis.clone(),
            description: record.description.clone(),
            formula: record.formula.clone(),
            expression: record.expression.clone(),
        },
        metrics: Some(record.backtest_metrics.clone()),
    }
}
