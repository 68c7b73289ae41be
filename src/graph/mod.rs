//! Ordering of resources by their declared relationships.
//!
//! Two kinds of edges exist:
//!
//! - `A requires B`: B converges before A. Only these edges define the order.
//! - `A notifies B`: if A changed, B is triggered afterwards. These are
//!   consulted by the [engine](crate::engine) after A converged.

use std::collections::{BTreeMap, BTreeSet};

use derive_more::{Display, Error};

use crate::model::{ResourceHandle, ResourceId, ResourceModel};

/// Relationship between two resources.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum EdgeKind {
    #[display("requires")]
    Requires,
    #[display("notifies")]
    Notifies,
}

/// The `requires` edges can't be ordered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct CycleDetectedError {
    /// Resources on the cycle, each requiring the next one. The first
    /// resource is repeated at the end.
    pub cycle: Vec<ResourceId>,
}

impl std::fmt::Display for CycleDetectedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Dependency cycle: ")?;
        for (idx, id) in self.cycle.iter().enumerate() {
            if idx > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Directed `requires`/`notifies` relations between declared resources.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// resource -> resources it requires
    requires: BTreeMap<ResourceHandle, BTreeSet<ResourceHandle>>,
    /// resource -> resources it notifies, in insertion order
    notifies: BTreeMap<ResourceHandle, Vec<ResourceHandle>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: ResourceHandle, to: ResourceHandle, kind: EdgeKind) {
        log::trace!(target: "graph", "{from:?} {kind} {to:?}");
        match kind {
            EdgeKind::Requires => {
                self.requires.entry(from).or_default().insert(to);
            }
            EdgeKind::Notifies => {
                let targets = self.notifies.entry(from).or_default();
                if !targets.contains(&to) {
                    targets.push(to);
                }
            }
        }
    }

    /// `from` requires `to`.
    pub fn require(&mut self, from: ResourceHandle, to: ResourceHandle) {
        self.add_edge(from, to, EdgeKind::Requires);
    }

    /// `from` notifies `to`.
    pub fn notify(&mut self, from: ResourceHandle, to: ResourceHandle) {
        self.add_edge(from, to, EdgeKind::Notifies);
    }

    /// Resources `handle` directly requires.
    pub fn prerequisites(&self, handle: ResourceHandle) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.requires.get(&handle).into_iter().flatten().copied()
    }

    /// Resources triggered when `handle` changed.
    pub fn notify_targets(&self, handle: ResourceHandle) -> &[ResourceHandle] {
        self.notifies
            .get(&handle)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every edge as `(from, to, kind)`, `requires` edges first.
    pub fn edges(&self) -> impl Iterator<Item = (ResourceHandle, ResourceHandle, EdgeKind)> + '_ {
        let requires = self.requires.iter().flat_map(|(&from, targets)| {
            targets
                .iter()
                .map(move |&to| (from, to, EdgeKind::Requires))
        });
        let notifies = self.notifies.iter().flat_map(|(&from, targets)| {
            targets
                .iter()
                .map(move |&to| (from, to, EdgeKind::Notifies))
        });
        requires.chain(notifies)
    }

    /// Resources that directly require `handle`.
    pub fn dependents(&self, handle: ResourceHandle) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.requires
            .iter()
            .filter(move |(_, prerequisites)| prerequisites.contains(&handle))
            .map(|(&dependent, _)| dependent)
    }

    /// Orders all resources of `model` so that every resource comes after
    /// everything it requires.
    ///
    /// Among resources that are ready at the same time the one declared first
    /// wins, so the order is stable for a given declaration order.
    ///
    /// # Errors
    ///
    /// Fails with the offending cycle if no such order exists.
    pub fn topological_order(
        &self,
        model: &ResourceModel,
    ) -> Result<Vec<ResourceHandle>, CycleDetectedError> {
        let mut pending: BTreeMap<ResourceHandle, usize> = model
            .handles()
            .map(|handle| (handle, self.prerequisites(handle).count()))
            .collect();

        let mut dependents: BTreeMap<ResourceHandle, Vec<ResourceHandle>> = BTreeMap::new();
        for (&from, prerequisites) in &self.requires {
            for &to in prerequisites {
                dependents.entry(to).or_default().push(from);
            }
        }

        let mut ready: BTreeSet<ResourceHandle> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&handle, _)| handle)
            .collect();
        let mut order = Vec::with_capacity(model.len());

        while let Some(handle) = ready.pop_first() {
            pending.remove(&handle);
            order.push(handle);

            for dependent in dependents.get(&handle).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            Err(self.find_cycle(model, &pending))
        }
    }

    /// Every resource left over by the topological sort still waits for
    /// another left over resource, so following those edges must loop.
    fn find_cycle(
        &self,
        model: &ResourceModel,
        remaining: &BTreeMap<ResourceHandle, usize>,
    ) -> CycleDetectedError {
        let mut path: Vec<ResourceHandle> = Vec::new();
        let mut current = remaining.keys().next().copied();

        while let Some(handle) = current {
            if let Some(start) = path.iter().position(|&seen| seen == handle) {
                path.drain(..start);
                path.push(handle);
                break;
            }
            path.push(handle);
            current = self
                .prerequisites(handle)
                .find(|prerequisite| remaining.contains_key(prerequisite));
        }

        CycleDetectedError {
            cycle: path
                .into_iter()
                .map(|handle| model.attributes_of(handle).id())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Package, Resource};

    fn model_of(names: &[&str]) -> (ResourceModel, Vec<ResourceHandle>) {
        let mut model = ResourceModel::new();
        let handles = names
            .iter()
            .map(|name| model.declare(Resource::package(Package::new(*name))).unwrap())
            .collect();
        (model, handles)
    }

    #[test]
    fn independent_resources_keep_declaration_order() {
        let (model, h) = model_of(&["a", "b", "c"]);
        let graph = DependencyGraph::new();
        assert_eq!(graph.topological_order(&model).unwrap(), h);
    }

    #[test]
    fn prerequisites_come_first() {
        let (model, h) = model_of(&["dir", "file", "package"]);
        let mut graph = DependencyGraph::new();
        graph.require(h[0], h[2]);
        graph.require(h[1], h[2]);
        graph.require(h[1], h[0]);

        assert_eq!(graph.topological_order(&model).unwrap(), vec![h[2], h[0], h[1]]);
    }

    #[test]
    fn edges_lists_both_kinds() {
        let (_, h) = model_of(&["set", "registration", "remove_default"]);
        let mut graph = DependencyGraph::new();
        graph.require(h[1], h[0]);
        graph.notify(h[1], h[2]);
        graph.notify(h[1], h[2]);

        assert_eq!(
            graph.edges().collect::<Vec<_>>(),
            vec![
                (h[1], h[0], EdgeKind::Requires),
                (h[1], h[2], EdgeKind::Notifies)
            ]
        );
    }

    #[test]
    fn ties_are_broken_by_declaration_order() {
        let (model, h) = model_of(&["late", "early", "root"]);
        let mut graph = DependencyGraph::new();
        graph.require(h[0], h[2]);
        graph.require(h[1], h[2]);

        assert_eq!(graph.topological_order(&model).unwrap(), vec![h[2], h[0], h[1]]);
    }

    #[test]
    fn notify_edges_do_not_order() {
        let (model, h) = model_of(&["target", "source"]);
        let mut graph = DependencyGraph::new();
        graph.notify(h[1], h[0]);
        graph.notify(h[1], h[0]);

        assert_eq!(graph.topological_order(&model).unwrap(), h);
        assert_eq!(graph.notify_targets(h[1]), &[h[0]]);
        assert!(graph.notify_targets(h[0]).is_empty());
    }

    #[test]
    fn cycles_are_reported_with_their_members() {
        let (model, h) = model_of(&["a", "b", "c", "d"]);
        let mut graph = DependencyGraph::new();
        graph.require(h[0], h[1]);
        graph.require(h[1], h[2]);
        graph.require(h[2], h[0]);
        graph.require(h[3], h[0]);

        let err = graph.topological_order(&model).unwrap_err();
        let names: Vec<_> = err.cycle.iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "a"]);
        assert_eq!(
            err.to_string(),
            "Dependency cycle: Package[a] -> Package[b] -> Package[c] -> Package[a]"
        );
    }

    #[test]
    fn self_requirement_is_a_cycle() {
        let mut model = ResourceModel::new();
        let dir = model
            .declare(Resource::directory(Node::new("/etc/holland")))
            .unwrap();
        let mut graph = DependencyGraph::new();
        graph.require(dir, dir);

        let err = graph.topological_order(&model).unwrap_err();
        assert_eq!(err.cycle.len(), 2);
    }

    #[test]
    fn dependents_are_the_reverse_of_requires() {
        let (_, h) = model_of(&["package", "dir", "file"]);
        let mut graph = DependencyGraph::new();
        graph.require(h[1], h[0]);
        graph.require(h[2], h[0]);

        let dependents: Vec<_> = graph.dependents(h[0]).collect();
        assert_eq!(dependents, vec![h[1], h[2]]);
        assert_eq!(graph.dependents(h[2]).count(), 0);
    }
}
