//! In-memory model of the desired system state.
//!
//! A [ResourceModel] holds every [Resource] declared for one convergence run.
//! Declaring only records the desired attributes, nothing is read from or
//! written to the system.

use std::collections::HashMap;

use derive_more::{Display, Error};

mod guard;
mod resource;

pub use guard::{Guard, GuardPredicateError};
pub use resource::{
    ConfigEdit, Desired, Ensure, FileContent, Node, Package, Registration, Resource, ResourceId,
    ResourceKind,
};

/// Handle of a declared [Resource], ordered by declaration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(usize);

impl ResourceHandle {
    /// Position of the resource in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Two declarations share the same [ResourceId].
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("Duplicate declaration of {_0}")]
pub struct DuplicateResourceError(#[error(ignore)] pub ResourceId);

/// All resources of one run.
#[derive(Debug, Default, Clone)]
pub struct ResourceModel {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, ResourceHandle>,
}

impl ResourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `resource` to the model.
    ///
    /// # Errors
    ///
    /// Fails if a resource with the same kind and name was already declared.
    /// The model stays unchanged in that case.
    pub fn declare(
        &mut self,
        resource: impl Into<Resource>,
    ) -> Result<ResourceHandle, DuplicateResourceError> {
        let resource = resource.into();
        let id = resource.id();
        if self.index.contains_key(&id) {
            return Err(DuplicateResourceError(id));
        }

        let handle = ResourceHandle(self.resources.len());
        log::trace!(target: "model", "Declared {id}");
        self.index.insert(id, handle);
        self.resources.push(resource);
        Ok(handle)
    }

    /// Desired attributes of a declared resource.
    ///
    /// # Panics
    ///
    /// Panics if `handle` wasn't returned by this model.
    pub fn attributes_of(&self, handle: ResourceHandle) -> &Resource {
        &self.resources[handle.0]
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<&Resource> {
        self.resources.get(handle.0)
    }

    pub fn handle_of(&self, id: &ResourceId) -> Option<ResourceHandle> {
        self.index.get(id).copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        (0..self.resources.len()).map(ResourceHandle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(idx, resource)| (ResourceHandle(idx), resource))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
