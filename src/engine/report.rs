use std::fmt;

use chrono::{DateTime, Local};

use super::FailureCause;
use crate::model::ResourceId;

/// Final state of a resource after a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Unchanged,
    Skipped,
    Failed,
}

/// A resource that could not be converged.
#[derive(Debug, serde::Serialize)]
pub struct FailedResource {
    pub id: ResourceId,
    #[serde(serialize_with = "serialize_display")]
    pub cause: FailureCause,
}

fn serialize_display<T: fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// What a convergence run did.
///
/// All lists are in the order the resources were evaluated, so for every
/// `requires` edge the prerequisite shows up before its dependent.
#[derive(Debug, serde::Serialize)]
pub struct ConvergenceReport {
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    /// Nothing was changed; `applied` lists what *would* have been applied.
    pub dry_run: bool,
    /// The run stopped at the first failure.
    pub aborted: bool,
    pub applied: Vec<ResourceId>,
    pub unchanged: Vec<ResourceId>,
    pub skipped: Vec<ResourceId>,
    pub failed: Vec<FailedResource>,
    /// Never evaluated because the run was aborted.
    pub pending: Vec<ResourceId>,
}

impl ConvergenceReport {
    pub(super) fn new(dry_run: bool) -> Self {
        let now = Local::now();
        Self {
            started: now,
            finished: now,
            dry_run,
            aborted: false,
            applied: Vec::new(),
            unchanged: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub(super) fn record_failure(&mut self, id: ResourceId, cause: FailureCause) {
        self.failed.push(FailedResource { id, cause });
    }

    /// Returns if no resource failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Outcome of the resource `id`, [None] if it was never evaluated.
    pub fn outcome_of(&self, id: &ResourceId) -> Option<Outcome> {
        if self.applied.contains(id) {
            Some(Outcome::Applied)
        } else if self.unchanged.contains(id) {
            Some(Outcome::Unchanged)
        } else if self.skipped.contains(id) {
            Some(Outcome::Skipped)
        } else if self.failed.iter().any(|failed| &failed.id == id) {
            Some(Outcome::Failed)
        } else {
            None
        }
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let applied = if self.dry_run { "would apply" } else { "applied" };
        for id in &self.applied {
            writeln!(f, "{applied:>11}  {id}")?;
        }
        for id in &self.skipped {
            writeln!(f, "{:>11}  {id}", "skipped")?;
        }
        for failed in &self.failed {
            writeln!(f, "{:>11}  {}: {}", "failed", failed.id, failed.cause)?;
        }
        for id in &self.pending {
            writeln!(f, "{:>11}  {id}", "not run")?;
        }

        write!(
            f,
            "{} {applied}, {} unchanged, {} skipped, {} failed in {}ms",
            self.applied.len(),
            self.unchanged.len(),
            self.skipped.len(),
            self.failed.len(),
            (self.finished - self.started).num_milliseconds(),
        )
    }
}
