//! Persistent factor library
//!
//! Append-only, insertion ordered, keyed by the stable factor id. The
//! redundancy reference set is kept alongside the records and shared with
//! gating jobs as a cheap `Arc` snapshot; appends copy-on-write it.
//!
//! Writes go to memory first; [`FactorLibrary::flush`] rewrites the whole
//! document atomically. The controller flushes only at round commit and on
//! timeout, so the file never reflects a partial round.

use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use factorforge_common::{
    EvolutionPhase, FactorCandidate, FactorRecord, LibraryDocument, LibraryError, MetricKind,
    Provenance,
};
use factorforge_expr::{Expr, ExpressionParser, ReferenceSet};

use super::persist::write_json_atomic;

pub struct FactorLibrary {
    path: PathBuf,
    records: Vec<FactorRecord>,
    by_id: HashMap<String, usize>,
    by_candidate: HashMap<Uuid, usize>,
    references: Arc<ReferenceSet>,
    dirty: bool,
}

impl FactorLibrary {
    /// Empty library bound to `path`; nothing is read or written
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            by_id: HashMap::new(),
            by_candidate: HashMap::new(),
            references: Arc::new(ReferenceSet::new()),
            dirty: false,
        }
    }

    /// Load the library at `path`, or start empty when the file is missing.
    ///
    /// Every stored expression is re-parsed to rebuild the redundancy
    /// reference set.
    #[instrument(skip_all)]
    pub fn open(path: impl AsRef<Path>, parser: &ExpressionParser) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let mut library = Self::new(path);
        if !path.exists() {
            debug!("No library file yet, starting empty");
            return Ok(library);
        }

        let text = std::fs::read_to_string(path).map_err(|e| LibraryError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let document: LibraryDocument =
            serde_json::from_str(&text).map_err(|e| LibraryError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        for record in document.factors {
            let ast = parser
                .parse(&record.canonical_expression)
                .or_else(|_| parser.parse(&record.expression))
                .map_err(|e| LibraryError::Corrupt {
                    path: path.display().to_string(),
                    message: format!("{}: {}", record.factor_id, e),
                })?;
            library.insert(record, &ast)?;
        }
        library.dirty = false;

        info!(path = %path.display(), factors = library.len(), "Loaded factor library");
        Ok(library)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether there are appends not yet flushed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records in admission order
    pub fn records(&self) -> &[FactorRecord] {
        &self.records
    }

    /// Snapshot of the admitted ASTs for redundancy checks
    pub fn references(&self) -> Arc<ReferenceSet> {
        Arc::clone(&self.references)
    }

    pub fn contains(&self, factor_id: &str) -> bool {
        self.by_id.contains_key(factor_id)
    }

    pub fn get(&self, factor_id: &str) -> Option<&FactorRecord> {
        self.by_id.get(factor_id).map(|&i| &self.records[i])
    }

    pub fn get_by_candidate(&self, candidate_id: &Uuid) -> Option<&FactorRecord> {
        self.by_candidate.get(candidate_id).map(|&i| &self.records[i])
    }

    /// Append an admitted candidate, stamped with the run and direction that
    /// produced it
    ///
    /// # Errors
    ///
    /// `NotAdmissible` unless the candidate is admitted, `DuplicateId` when
    /// its factor id is already stored.
    pub fn append(
        &mut self,
        candidate: &FactorCandidate,
        ast: &Expr,
        provenance: &Provenance,
    ) -> Result<&FactorRecord, LibraryError> {
        let record = FactorRecord::from_candidate(candidate, provenance)?;
        let slot = self.insert(record, ast)?;
        Ok(&self.records[slot])
    }

    fn insert(&mut self, record: FactorRecord, ast: &Expr) -> Result<usize, LibraryError> {
        if self.by_id.contains_key(&record.factor_id) {
            return Err(LibraryError::DuplicateId(record.factor_id));
        }
        let slot = self.records.len();
        Arc::make_mut(&mut self.references).insert(record.factor_id.clone(), ast);
        self.by_id.insert(record.factor_id.clone(), slot);
        self.by_candidate.insert(record.candidate_id, slot);
        self.records.push(record);
        self.dirty = true;
        Ok(slot)
    }

    /// Top `n` records by `metric`, descending. Records without the metric
    /// are left out; ties keep admission order.
    pub fn top_by(&self, metric: MetricKind, n: usize) -> Vec<&FactorRecord> {
        let mut scored: Vec<(f64, &FactorRecord)> = self
            .records
            .iter()
            .filter_map(|r| r.backtest_metrics.get(metric).map(|v| (v, r)))
            .collect();
        scored.sort_by(|a, b| OrderedFloat(b.0).cmp(&OrderedFloat(a.0)));
        scored.into_iter().take(n).map(|(_, r)| r).collect()
    }

    pub fn by_phase(&self, phase: EvolutionPhase) -> Vec<&FactorRecord> {
        self.records
            .iter()
            .filter(|r| r.evolution_phase == phase)
            .collect()
    }

    pub fn by_round(&self, round: u32) -> Vec<&FactorRecord> {
        self.records
            .iter()
            .filter(|r| r.round_number == round)
            .collect()
    }

    pub fn by_trajectory(&self, trajectory_id: &Uuid) -> Vec<&FactorRecord> {
        self.records
            .iter()
            .filter(|r| r.trajectory_id == *trajectory_id)
            .collect()
    }

    pub fn by_direction(&self, direction: &str) -> Vec<&FactorRecord> {
        self.records
            .iter()
            .filter(|r| r.direction == direction)
            .collect()
    }

    /// Records admitted by one mining run
    pub fn by_experiment(&self, experiment_id: &Uuid) -> Vec<&FactorRecord> {
        self.records
            .iter()
            .filter(|r| r.experiment_id == *experiment_id)
            .collect()
    }

    /// Rewrite the library file atomically
    pub fn flush(&mut self) -> Result<(), LibraryError> {
        let document = LibraryDocument::new(self.records.clone());
        write_json_atomic(&self.path, &document).map_err(|e| LibraryError::Write {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        self.dirty = false;
        debug!(path = %self.path.display(), factors = self.records.len(), "Flushed factor library");
        Ok(())
    }
}
