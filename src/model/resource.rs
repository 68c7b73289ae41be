use std::fmt;
use std::path::{Path, PathBuf};

use derive_more::Display;

use super::Guard;
use crate::lens::KeyPath;

/// Kind of a [Resource].
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ResourceKind {
    Package,
    Directory,
    File,
    ConfigEdit,
    Registration,
}

/// Identity of a [Resource]: unique within one [ResourceModel](super::ResourceModel).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

/// Whether a package or node should exist.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub ensure: Ensure,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Ensure::Present,
        }
    }

    pub fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }
}

/// What to write into a managed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    /// The file always has exactly this content.
    Exact(String),
    /// Written only when the file is created; later edits are left alone.
    Seed(String),
}

/// Desired state of a directory or file.
///
/// Attributes that are [None] are not managed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub path: PathBuf,
    pub ensure: Ensure,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    pub content: Option<FileContent>,
}

impl Node {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ensure: Ensure::Present,
            owner: None,
            group: None,
            mode: None,
            content: None,
        }
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn content(mut self, content: FileContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }
}

/// Sets a single key of an INI file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEdit {
    pub file: PathBuf,
    pub key: KeyPath,
    pub value: String,
    pub guard: Option<Guard>,
}

impl ConfigEdit {
    pub fn new(file: impl Into<PathBuf>, key: KeyPath, value: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            key,
            value: value.into(),
            guard: None,
        }
    }

    /// Only apply the edit if `guard` holds.
    pub fn only_if(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Ensures `entry` is a member of the comma separated list under `key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub file: PathBuf,
    pub key: KeyPath,
    pub entry: String,
    pub guard: Option<Guard>,
}

impl Registration {
    pub fn new(file: impl Into<PathBuf>, key: KeyPath, entry: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            key,
            entry: entry.into(),
            guard: None,
        }
    }

    /// Only apply the registration if `guard` holds.
    pub fn only_if(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Desired state, by kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Desired {
    Package(Package),
    Directory(Node),
    File(Node),
    ConfigEdit(ConfigEdit),
    Registration(Registration),
}

/// A single declared unit of desired system state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub desired: Desired,
    /// Only converged when notified by a changed resource.
    pub refreshonly: bool,
}

impl Resource {
    pub fn new(desired: Desired) -> Self {
        Self {
            desired,
            refreshonly: false,
        }
    }

    pub fn package(package: Package) -> Self {
        Self::new(Desired::Package(package))
    }

    pub fn directory(node: Node) -> Self {
        Self::new(Desired::Directory(node))
    }

    pub fn file(node: Node) -> Self {
        Self::new(Desired::File(node))
    }

    pub fn config_edit(edit: ConfigEdit) -> Self {
        Self::new(Desired::ConfigEdit(edit))
    }

    pub fn registration(registration: Registration) -> Self {
        Self::new(Desired::Registration(registration))
    }

    pub fn refreshonly(mut self) -> Self {
        self.refreshonly = true;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.desired {
            Desired::Package(_) => ResourceKind::Package,
            Desired::Directory(_) => ResourceKind::Directory,
            Desired::File(_) => ResourceKind::File,
            Desired::ConfigEdit(_) => ResourceKind::ConfigEdit,
            Desired::Registration(_) => ResourceKind::Registration,
        }
    }

    pub fn id(&self) -> ResourceId {
        let name = match &self.desired {
            Desired::Package(package) => package.name.clone(),
            Desired::Directory(node) | Desired::File(node) => node.path.display().to_string(),
            Desired::ConfigEdit(edit) => format!("{}/{}", edit.file.display(), edit.key),
            Desired::Registration(reg) => {
                format!("{}/{} {}", reg.file.display(), reg.key, reg.entry)
            }
        };
        ResourceId::new(self.kind(), name)
    }

    /// The file an edit operates on.
    pub fn target_file(&self) -> Option<&Path> {
        match &self.desired {
            Desired::ConfigEdit(edit) => Some(&edit.file),
            Desired::Registration(reg) => Some(&reg.file),
            _ => None,
        }
    }

    pub fn guard(&self) -> Option<&Guard> {
        match &self.desired {
            Desired::ConfigEdit(edit) => edit.guard.as_ref(),
            Desired::Registration(reg) => reg.guard.as_ref(),
            _ => None,
        }
    }
}
