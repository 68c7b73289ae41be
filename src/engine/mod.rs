//! Convergence of a [ResourceModel] against a [Host].
//!
//! A run walks the resources in [topological order](DependencyGraph::topological_order),
//! diffs each one against the live system and applies only what differs.
//! Resources that changed trigger their `notifies` targets:
//!
//! - a target that comes later in the order is converged at its own position,
//! - a target that was already passed (typically a `refreshonly` resource) is
//!   converged right after the notifying resource,
//! - a target that was already converged is never converged a second time.
//!
//! `refreshonly` resources are only converged when triggered. Untriggered ones
//! are reported as unchanged.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use chrono::Local;
use derive_more::{Display, Error, From};

mod apply;
mod report;

pub use apply::{ApplyError, FailureCause};
pub use report::{ConvergenceReport, FailedResource, Outcome};

use self::apply::Change;
use crate::graph::{CycleDetectedError, DependencyGraph, EdgeKind};
use crate::host::Host;
use crate::model::{ResourceHandle, ResourceId, ResourceKind, ResourceModel};

/// What to do when a resource fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the remaining run.
    #[default]
    FailFast,
    /// Keep converging everything that doesn't (transitively) require a
    /// failed resource.
    ContinueOnError,
}

/// The run can't start. Nothing was changed.
#[derive(Debug, Display, Error, From)]
pub enum PlanError {
    #[from]
    Cycle(CycleDetectedError),
    /// An edit targets a file that isn't declared as a resource.
    #[display("{edit} targets {} which is not a declared file resource", file.display())]
    UndeclaredTarget { edit: ResourceId, file: PathBuf },
    /// An edge references a handle of another model.
    #[display("A {kind} edge references resource #{} which is not part of the model", handle.index())]
    UnknownHandle {
        handle: ResourceHandle,
        kind: EdgeKind,
    },
}

/// Validated execution order of a model.
#[derive(Debug, Clone)]
pub struct Plan {
    pub order: Vec<ResourceHandle>,
    /// The declared graph plus the implicit edges of edits to their files.
    pub graph: DependencyGraph,
}

/// Orders `model` for a run.
///
/// Every [ConfigEdit](crate::model::ConfigEdit) and
/// [Registration](crate::model::Registration) implicitly requires the file
/// resource of its target.
pub fn plan(model: &ResourceModel, graph: &DependencyGraph) -> Result<Plan, PlanError> {
    for (from, to, kind) in graph.edges() {
        if let Some(handle) = [from, to].into_iter().find(|h| model.get(*h).is_none()) {
            return Err(PlanError::UnknownHandle { handle, kind });
        }
    }

    let mut graph = graph.clone();

    for (handle, resource) in model.iter() {
        let Some(file) = resource.target_file() else {
            continue;
        };

        let file_id = ResourceId::new(ResourceKind::File, file.display().to_string());
        let target = model
            .handle_of(&file_id)
            .ok_or_else(|| PlanError::UndeclaredTarget {
                edit: resource.id(),
                file: file.to_path_buf(),
            })?;
        graph.require(handle, target);
    }

    let order = graph.topological_order(model)?;
    Ok(Plan { order, graph })
}

/// Converges declared resources on a [Host].
#[derive(Debug)]
pub struct ConvergenceEngine<H> {
    host: H,
    policy: FailurePolicy,
    dry_run: bool,
}

impl<H: Host> ConvergenceEngine<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            policy: FailurePolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// On a dry run differences are detected and reported, but the host is
    /// never changed.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Converges every resource of `model`.
    ///
    /// # Errors
    ///
    /// Only structural problems of the model are errors. Failures of single
    /// resources end up in the [ConvergenceReport].
    pub fn run(
        &mut self,
        model: &ResourceModel,
        graph: &DependencyGraph,
    ) -> Result<ConvergenceReport, PlanError> {
        let plan = plan(model, graph)?;
        log::info!(target: "engine", "Converging {} resources", plan.order.len());
        if self.dry_run {
            log::warn!(target: "engine", "Running in dry-run mode");
        }

        let run = Run::new(model, &plan, &mut self.host, self.policy, self.dry_run);
        let report = run.execute();

        log::info!(
            target: "engine",
            "Finished: {} applied, {} unchanged, {} skipped, {} failed",
            report.applied.len(),
            report.unchanged.len(),
            report.skipped.len(),
            report.failed.len(),
        );
        Ok(report)
    }
}

/// State of a single run.
struct Run<'a> {
    model: &'a ResourceModel,
    plan: &'a Plan,
    host: &'a mut dyn Host,
    policy: FailurePolicy,
    dry_run: bool,
    /// position in `plan.order`, by handle index
    position: Vec<usize>,
    /// by handle index
    outcomes: Vec<Option<Outcome>>,
    triggered: BTreeSet<ResourceHandle>,
    report: ConvergenceReport,
}

impl<'a> Run<'a> {
    fn new(
        model: &'a ResourceModel,
        plan: &'a Plan,
        host: &'a mut dyn Host,
        policy: FailurePolicy,
        dry_run: bool,
    ) -> Self {
        let mut position = vec![0; model.len()];
        for (pos, handle) in plan.order.iter().enumerate() {
            position[handle.index()] = pos;
        }

        Self {
            model,
            plan,
            host,
            policy,
            dry_run,
            position,
            outcomes: vec![None; model.len()],
            triggered: BTreeSet::new(),
            report: ConvergenceReport::new(dry_run),
        }
    }

    fn execute(mut self) -> ConvergenceReport {
        let plan = self.plan;
        let mut aborted_at = None;

        for (pos, &handle) in plan.order.iter().enumerate() {
            if self.outcomes[handle.index()].is_some() {
                continue;
            }
            if self.model.attributes_of(handle).refreshonly && !self.triggered.contains(&handle) {
                continue;
            }

            if !self.converge_with_notifications(handle, pos) {
                aborted_at = Some(pos);
                break;
            }
        }

        for (pos, &handle) in plan.order.iter().enumerate() {
            if self.outcomes[handle.index()].is_some() {
                continue;
            }

            let id = self.model.attributes_of(handle).id();
            // refreshonly resources the run passed without a trigger
            let passed = aborted_at.is_none_or(|at| pos < at);
            if passed && !self.triggered.contains(&handle) {
                self.report.unchanged.push(id);
            } else {
                self.report.pending.push(id);
            }
        }

        self.report.aborted = aborted_at.is_some();
        self.report.finished = Local::now();
        self.report
    }

    /// Converges `handle` and everything it triggers that can't wait for its
    /// own position. Returns `false` if the run has to be aborted.
    fn converge_with_notifications(&mut self, handle: ResourceHandle, pos: usize) -> bool {
        let plan = self.plan;
        let mut queue = VecDeque::from([handle]);

        while let Some(next) = queue.pop_front() {
            if self.outcomes[next.index()].is_some() {
                continue;
            }

            match self.converge(next) {
                Outcome::Applied => {
                    for &target in plan.graph.notify_targets(next) {
                        self.notify(next, target, pos, &mut queue);
                    }
                }
                Outcome::Failed if self.policy == FailurePolicy::FailFast => return false,
                _ => {}
            }
        }

        true
    }

    fn notify(
        &mut self,
        source: ResourceHandle,
        target: ResourceHandle,
        pos: usize,
        queue: &mut VecDeque<ResourceHandle>,
    ) {
        let model = self.model;
        let (source_id, target_id) = (
            model.attributes_of(source).id(),
            model.attributes_of(target).id(),
        );
        if self.outcomes[target.index()].is_some() {
            log::debug!(target: "engine", "{target_id} already converged, ignoring notification from {source_id}");
            return;
        }

        log::debug!(target: "engine", "{target_id} triggered by {source_id}");
        self.triggered.insert(target);
        if self.position[target.index()] < pos {
            queue.push_back(target);
        }
    }

    fn converge(&mut self, handle: ResourceHandle) -> Outcome {
        let model = self.model;
        let resource = model.attributes_of(handle);
        let id = resource.id();

        let failed_prerequisite = self
            .plan
            .graph
            .prerequisites(handle)
            .find(|prerequisite| self.outcomes[prerequisite.index()] == Some(Outcome::Failed));
        if let Some(prerequisite) = failed_prerequisite {
            let prerequisite = model.attributes_of(prerequisite).id();
            log::warn!(target: "engine", "{id}: not converged, required {prerequisite} failed");
            return self.fail(handle, id, FailureCause::DependencyFailed(prerequisite));
        }

        let outcome = match apply::converge(resource, &mut *self.host, self.dry_run) {
            Ok(Change::Unchanged) => {
                log::debug!(target: "engine", "{id}: in sync");
                self.report.unchanged.push(id);
                Outcome::Unchanged
            }
            Ok(Change::Applied(actions)) => {
                for action in actions {
                    log::info!(target: "engine", "{id}: {action}");
                }
                self.report.applied.push(id);
                Outcome::Applied
            }
            Ok(Change::Skipped(guard)) => {
                log::info!(target: "engine", "{id}: skipped, `{guard}` doesn't hold");
                self.report.skipped.push(id);
                Outcome::Skipped
            }
            Err(cause) => {
                log::error!(target: "engine", "{id}: {cause}");
                return self.fail(handle, id, cause);
            }
        };

        self.outcomes[handle.index()] = Some(outcome);
        outcome
    }

    fn fail(&mut self, handle: ResourceHandle, id: ResourceId, cause: FailureCause) -> Outcome {
        self.report.record_failure(id, cause);
        self.outcomes[handle.index()] = Some(Outcome::Failed);
        Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::host::{MemoryHost, Operation, Probe};
    use crate::lens::KeyPath;
    use crate::model::{ConfigEdit, FileContent, Node, Package, Resource};

    const CONF: &str = "/etc/holland/holland.conf";
    const DEFAULT_SET: &str = "/etc/holland/backupsets/default.conf";

    fn id(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    #[test]
    fn prerequisites_are_applied_first() {
        let mut model = ResourceModel::new();
        let file = model
            .declare(Resource::file(Node::new("/etc/holland/holland.conf")))
            .unwrap();
        let dir = model
            .declare(Resource::directory(Node::new("/etc/holland")))
            .unwrap();
        let mut graph = DependencyGraph::new();
        graph.require(file, dir);

        let mut engine = ConvergenceEngine::new(MemoryHost::new());
        let report = engine.run(&model, &graph).unwrap();
        assert_eq!(
            report.applied,
            vec![
                id(ResourceKind::Directory, "/etc/holland"),
                id(ResourceKind::File, CONF)
            ]
        );
        assert_eq!(
            engine.host().journal(),
            &[
                Operation::CreateDir("/etc/holland".into()),
                Operation::WriteFile(CONF.into())
            ]
        );
    }

    #[test]
    fn refreshonly_resource_is_idle_without_notification() {
        let mut model = ResourceModel::new();
        model
            .declare(Resource::file(Node::new(DEFAULT_SET).absent()).refreshonly())
            .unwrap();

        let host = MemoryHost::new().with_file(DEFAULT_SET, "");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &DependencyGraph::new()).unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.unchanged, vec![id(ResourceKind::File, DEFAULT_SET)]);
        assert!(engine.host().contents(DEFAULT_SET).is_some());
    }

    #[test]
    fn notified_earlier_refreshonly_runs_right_after_source() {
        let mut model = ResourceModel::new();
        let remove = model
            .declare(Resource::file(Node::new(DEFAULT_SET).absent()).refreshonly())
            .unwrap();
        let first = model.declare(Resource::package(Package::new("a"))).unwrap();
        let second = model.declare(Resource::package(Package::new("b"))).unwrap();
        let mut graph = DependencyGraph::new();
        graph.notify(first, remove);
        graph.notify(second, remove);

        let host = MemoryHost::new().with_file(DEFAULT_SET, "");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &graph).unwrap();

        assert_eq!(
            report.applied,
            vec![
                id(ResourceKind::Package, "a"),
                id(ResourceKind::File, DEFAULT_SET),
                id(ResourceKind::Package, "b"),
            ]
        );
        let removals = engine
            .host()
            .journal()
            .iter()
            .filter(|op| matches!(op, Operation::RemoveFile(_)))
            .count();
        assert_eq!(removals, 1);
    }

    #[test]
    fn unchanged_source_does_not_notify() {
        let mut model = ResourceModel::new();
        let package = model.declare(Resource::package(Package::new("holland"))).unwrap();
        let remove = model
            .declare(Resource::file(Node::new(DEFAULT_SET).absent()).refreshonly())
            .unwrap();
        let mut graph = DependencyGraph::new();
        graph.notify(package, remove);

        let host = MemoryHost::new()
            .with_package("holland")
            .with_file(DEFAULT_SET, "");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &graph).unwrap();

        assert!(report.applied.is_empty());
        assert!(engine.host().contents(DEFAULT_SET).is_some());
    }

    #[test]
    fn fail_fast_stops_the_run() {
        let mut model = ResourceModel::new();
        model
            .declare(Resource::directory(Node::new("/etc/holland")))
            .unwrap();
        model
            .declare(Resource::directory(Node::new("/var/spool/holland")))
            .unwrap();

        let host = MemoryHost::new()
            .with_dir("/var/spool")
            .with_failing("/etc/holland");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &DependencyGraph::new()).unwrap();

        assert!(report.aborted);
        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, id(ResourceKind::Directory, "/etc/holland"));
        assert_eq!(
            report.pending,
            vec![id(ResourceKind::Directory, "/var/spool/holland")]
        );
        assert!(engine.host().journal().is_empty());
    }

    #[test]
    fn fail_fast_keeps_passed_refreshonly_unchanged() {
        let mut model = ResourceModel::new();
        model
            .declare(Resource::file(Node::new(DEFAULT_SET).absent()).refreshonly())
            .unwrap();
        model
            .declare(Resource::directory(Node::new("/etc/holland")))
            .unwrap();
        model
            .declare(Resource::directory(Node::new("/var/spool/holland")))
            .unwrap();

        let host = MemoryHost::new()
            .with_dir("/var/spool")
            .with_failing("/etc/holland");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &DependencyGraph::new()).unwrap();

        assert!(report.aborted);
        assert_eq!(report.unchanged, vec![id(ResourceKind::File, DEFAULT_SET)]);
        assert_eq!(
            report.pending,
            vec![id(ResourceKind::Directory, "/var/spool/holland")]
        );
    }

    #[test]
    fn edges_into_another_model_are_rejected() {
        let mut model = ResourceModel::new();
        let package = model.declare(Resource::package(Package::new("holland"))).unwrap();

        let mut other = ResourceModel::new();
        other.declare(Resource::package(Package::new("a"))).unwrap();
        let foreign = other.declare(Resource::package(Package::new("b"))).unwrap();

        for kind in [EdgeKind::Requires, EdgeKind::Notifies] {
            let mut graph = DependencyGraph::new();
            graph.add_edge(package, foreign, kind);

            let mut engine = ConvergenceEngine::new(MemoryHost::new());
            let err = engine.run(&model, &graph).unwrap_err();
            assert!(
                matches!(err, PlanError::UnknownHandle { handle, kind: k } if handle == foreign && k == kind),
                "{err}"
            );
            assert!(engine.host().journal().is_empty());
        }
    }

    #[test]
    fn continue_on_error_skips_only_dependents() {
        let mut model = ResourceModel::new();
        let dir = model
            .declare(Resource::directory(Node::new("/etc/holland")))
            .unwrap();
        let file = model.declare(Resource::file(Node::new(CONF))).unwrap();
        model
            .declare(Resource::config_edit(ConfigEdit::new(
                CONF,
                KeyPath::new("holland", "umask"),
                "0007",
            )))
            .unwrap();
        model
            .declare(Resource::directory(Node::new("/var/spool/holland")))
            .unwrap();
        let mut graph = DependencyGraph::new();
        graph.require(file, dir);

        let host = MemoryHost::new()
            .with_dir("/var/spool")
            .with_failing("/etc/holland");
        let mut engine = ConvergenceEngine::new(host).with_policy(FailurePolicy::ContinueOnError);
        let report = engine.run(&model, &graph).unwrap();

        assert!(!report.aborted);
        let failed: Vec<_> = report.failed.iter().map(|f| f.id.kind).collect();
        assert_eq!(
            failed,
            vec![
                ResourceKind::Directory,
                ResourceKind::File,
                ResourceKind::ConfigEdit
            ]
        );
        assert!(matches!(
            report.failed[1].cause,
            FailureCause::DependencyFailed(_)
        ));
        assert_eq!(
            report.applied,
            vec![id(ResourceKind::Directory, "/var/spool/holland")]
        );
    }

    #[test]
    fn edit_without_declared_file_is_rejected_before_the_run() {
        let mut model = ResourceModel::new();
        model.declare(Resource::package(Package::new("holland"))).unwrap();
        model
            .declare(Resource::config_edit(ConfigEdit::new(
                CONF,
                KeyPath::new("holland", "umask"),
                "0007",
            )))
            .unwrap();

        let mut engine = ConvergenceEngine::new(MemoryHost::new());
        let err = engine.run(&model, &DependencyGraph::new()).unwrap_err();
        assert!(matches!(err, PlanError::UndeclaredTarget { .. }));
        assert!(engine.host().journal().is_empty());
    }

    #[test]
    fn edits_implicitly_require_their_file() {
        let mut model = ResourceModel::new();
        model
            .declare(Resource::config_edit(ConfigEdit::new(
                CONF,
                KeyPath::new("holland", "umask"),
                "0007",
            )))
            .unwrap();
        model
            .declare(Resource::file(
                Node::new(CONF).content(FileContent::Seed("[holland]\n".into())),
            ))
            .unwrap();

        let host = MemoryHost::new().with_dir("/etc/holland");
        let mut engine = ConvergenceEngine::new(host);
        let report = engine.run(&model, &DependencyGraph::new()).unwrap();

        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.applied[0].kind, ResourceKind::File);
        assert_eq!(
            engine.host().contents(CONF),
            Some("[holland]\numask = 0007\n")
        );
    }

    #[test]
    fn cycle_is_rejected_before_the_run() {
        let mut model = ResourceModel::new();
        let a = model.declare(Resource::package(Package::new("a"))).unwrap();
        let b = model.declare(Resource::package(Package::new("b"))).unwrap();
        let mut graph = DependencyGraph::new();
        graph.require(a, b);
        graph.require(b, a);

        let mut engine = ConvergenceEngine::new(MemoryHost::new());
        assert!(matches!(
            engine.run(&model, &graph),
            Err(PlanError::Cycle(_))
        ));
        assert!(engine.host().journal().is_empty());
    }

    #[test]
    fn dry_run_reports_without_changing() {
        let mut model = ResourceModel::new();
        let package = model.declare(Resource::package(Package::new("holland"))).unwrap();
        let dir = model
            .declare(Resource::directory(Node::new("/etc/holland").mode(0o750)))
            .unwrap();
        let mut graph = DependencyGraph::new();
        graph.require(dir, package);

        let mut engine = ConvergenceEngine::new(MemoryHost::new()).with_dry_run(true);
        let report = engine.run(&model, &graph).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.applied.len(), 2);
        assert!(engine.host().journal().is_empty());
        assert!(engine
            .host()
            .stat(Path::new("/etc/holland"))
            .unwrap()
            .is_none());
    }
}
