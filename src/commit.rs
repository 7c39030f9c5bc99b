//! Change tracking and commits.
//!
//! The [`ChangeLog`] holds what differs from the last committed state. Opposite
//! operations cancel each other, so the log is always the symmetric difference
//! between the live graph and the committed one, and [`ChangeLog::delta`] is
//! the minimal set of changes a wrapper has to apply.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::construct::{Individual, OtherHasher, SequencedTriple, Uid, UidHasher};
use crate::error::{CudsError, Result};
use crate::wrapper::Wrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitState {
    Clean,
    Dirty,
    Committing,
    Committed,
    Failed,
}
impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The changes a wrapper applies in one go: removals first, then additions.
#[derive(Debug, Default, Clone)]
pub struct Delta {
    pub added_individuals: Vec<Individual>,
    pub removed_individuals: Vec<Uid>,
    pub added_triples: Vec<SequencedTriple>,
    pub removed_triples: Vec<SequencedTriple>,
    /// The largest identity handed out so far.
    pub high_water_mark: u64,
}
impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added_individuals.is_empty()
            && self.removed_individuals.is_empty()
            && self.added_triples.is_empty()
            && self.removed_triples.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ChangeLog {
    added_individuals: HashMap<Uid, Individual, UidHasher>,
    removed_individuals: HashMap<Uid, Individual, UidHasher>,
    added_triples: HashSet<SequencedTriple, OtherHasher>,
    removed_triples: HashSet<SequencedTriple, OtherHasher>,
}

impl ChangeLog {
    pub fn individual_added(&mut self, individual: Individual) {
        if self.removed_individuals.get(&individual.uid()) == Some(&individual) {
            self.removed_individuals.remove(&individual.uid());
        } else {
            self.added_individuals.insert(individual.uid(), individual);
        }
    }
    pub fn individual_removed(&mut self, individual: Individual) {
        if self.added_individuals.remove(&individual.uid()).is_none() {
            self.removed_individuals.insert(individual.uid(), individual);
        }
    }
    pub fn triple_added(&mut self, triple: SequencedTriple) {
        if !self.removed_triples.remove(&triple) {
            self.added_triples.insert(triple);
        }
    }
    pub fn triple_removed(&mut self, triple: SequencedTriple) {
        if !self.added_triples.remove(&triple) {
            self.removed_triples.insert(triple);
        }
    }
    pub fn is_empty(&self) -> bool {
        self.added_individuals.is_empty()
            && self.removed_individuals.is_empty()
            && self.added_triples.is_empty()
            && self.removed_triples.is_empty()
    }
    pub fn clear(&mut self) {
        self.added_individuals.clear();
        self.removed_individuals.clear();
        self.added_triples.clear();
        self.removed_triples.clear();
    }
    pub fn delta(&self, high_water_mark: u64) -> Delta {
        let mut added_individuals: Vec<Individual> =
            self.added_individuals.values().cloned().collect();
        added_individuals.sort_by_key(|i| i.uid());
        let mut removed_individuals: Vec<Uid> = self.removed_individuals.keys().copied().collect();
        removed_individuals.sort();
        Delta {
            added_individuals,
            removed_individuals,
            added_triples: self.added_triples.iter().cloned().collect(),
            removed_triples: self.removed_triples.iter().cloned().collect(),
            high_water_mark,
        }
    }
}

/// What a commit did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub individuals_added: usize,
    pub individuals_removed: usize,
    pub triples_added: usize,
    pub triples_removed: usize,
    /// Whether a wrapper was asked to persist anything.
    pub written: bool,
}
impl CommitReport {
    fn of(delta: &Delta, written: bool) -> Self {
        Self {
            individuals_added: delta.added_individuals.len(),
            individuals_removed: delta.removed_individuals.len(),
            triples_added: delta.added_triples.len(),
            triples_removed: delta.removed_triples.len(),
            written,
        }
    }
}

#[derive(Debug)]
pub struct CommitEngine {
    state: CommitState,
    log: ChangeLog,
    commits: u64,
}

impl CommitEngine {
    pub fn new() -> Self {
        Self {
            state: CommitState::Clean,
            log: ChangeLog::default(),
            commits: 0,
        }
    }
    pub fn state(&self) -> CommitState {
        self.state
    }
    pub fn log(&self) -> &ChangeLog {
        &self.log
    }
    /// Number of commits that reached the wrapper successfully.
    pub fn commits(&self) -> u64 {
        self.commits
    }
    /// Applies a mutation to the log and updates the state accordingly.
    pub fn record(&mut self, change: impl FnOnce(&mut ChangeLog)) {
        change(&mut self.log);
        self.state = if self.log.is_empty() {
            CommitState::Clean
        } else {
            CommitState::Dirty
        };
    }
    /// Drops all pending changes, e.g. after the backend was cleared.
    pub fn reset(&mut self) {
        self.log.clear();
        self.state = CommitState::Clean;
    }

    /// Persists the pending changes through the wrapper, if there is one.
    /// On failure the log is kept as it was, so the commit can be retried.
    pub fn commit(
        &mut self,
        wrapper: Option<&mut (dyn Wrapper + 'static)>,
        high_water_mark: u64,
    ) -> Result<CommitReport> {
        if self.log.is_empty() {
            self.state = CommitState::Clean;
            debug!("nothing to commit");
            return Ok(CommitReport::default());
        }
        self.state = CommitState::Committing;
        let delta = self.log.delta(high_water_mark);
        let written = match wrapper {
            Some(wrapper) => {
                if let Err(e) = wrapper.persist(&delta) {
                    self.state = CommitState::Failed;
                    warn!(
                        backend = wrapper.kind(),
                        location = wrapper.location(),
                        error = %e,
                        "commit failed, pending changes kept"
                    );
                    return Err(CudsError::CommitFailed { source: Box::new(e) });
                }
                true
            }
            None => false,
        };
        self.state = CommitState::Committed;
        self.commits += 1;
        let report = CommitReport::of(&delta, written);
        info!(
            individuals_added = report.individuals_added,
            individuals_removed = report.individuals_removed,
            triples_added = report.triples_added,
            triples_removed = report.triples_removed,
            written,
            "commit complete"
        );
        self.log.clear();
        self.state = CommitState::Clean;
        Ok(report)
    }
}
impl Default for CommitEngine {
    fn default() -> Self {
        Self::new()
    }
}
