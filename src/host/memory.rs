use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use super::{Host, HostError, NodeKind, NodeState, Probe};

const DEFAULT_OWNER: &str = "root";
const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// A side effect performed on a [MemoryHost].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    InstallPackage(String),
    RemovePackage(String),
    CreateDir(PathBuf),
    WriteFile(PathBuf),
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
    SetMode(PathBuf, u32),
    SetOwner(PathBuf),
}

impl Operation {
    /// Path touched by the operation, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InstallPackage(_) | Self::RemovePackage(_) => None,
            Self::CreateDir(path)
            | Self::WriteFile(path)
            | Self::RemoveFile(path)
            | Self::RemoveDir(path)
            | Self::SetMode(path, _)
            | Self::SetOwner(path) => Some(path),
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    state: NodeState,
    contents: String,
}

/// In-memory simulation of a system.
///
/// Starts out with the directories `/` and `/etc`. Every mutation is recorded
/// in the [journal](Self::journal) in the order it happened.
#[derive(Clone, Debug)]
pub struct MemoryHost {
    nodes: BTreeMap<PathBuf, Node>,
    packages: BTreeSet<String>,
    package_files: BTreeMap<String, Vec<(PathBuf, String)>>,
    unreadable: BTreeSet<PathBuf>,
    failing: BTreeSet<PathBuf>,
    journal: Vec<Operation>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut host = Self {
            nodes: BTreeMap::new(),
            packages: BTreeSet::new(),
            package_files: BTreeMap::new(),
            unreadable: BTreeSet::new(),
            failing: BTreeSet::new(),
            journal: Vec::new(),
        };
        host.insert_dir(Path::new("/"));
        host.insert_dir(Path::new("/etc"));
        host
    }

    /// Marks `name` as already installed.
    pub fn with_package(mut self, name: &str) -> Self {
        self.packages.insert(name.to_string());
        self
    }

    /// Adds a directory (and its parents) without journaling it.
    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.insert_parents(path.as_ref());
        self.insert_dir(path.as_ref());
        self
    }

    /// Adds a file (and its parent directories) without journaling it.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: &str) -> Self {
        self.insert_parents(path.as_ref());
        self.insert_file(path.as_ref(), contents);
        self
    }

    /// Installing `package` will also create the file at `path`.
    pub fn with_package_file(mut self, package: &str, path: impl AsRef<Path>, contents: &str) -> Self {
        self.package_files
            .entry(package.to_string())
            .or_default()
            .push((path.as_ref().to_path_buf(), contents.to_string()));
        self
    }

    /// Reading `path` will fail with a permission error.
    pub fn with_unreadable(mut self, path: impl AsRef<Path>) -> Self {
        self.unreadable.insert(path.as_ref().to_path_buf());
        self
    }

    /// Every mutation of `path` will fail with a permission error.
    pub fn with_failing(mut self, path: impl AsRef<Path>) -> Self {
        self.failing.insert(path.as_ref().to_path_buf());
        self
    }

    pub fn journal(&self) -> &[Operation] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Contents of the file at `path`, if there is one.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.nodes
            .get(path.as_ref())
            .filter(|node| node.state.kind == NodeKind::File)
            .map(|node| node.contents.as_str())
    }

    fn insert_dir(&mut self, path: &Path) {
        self.nodes.entry(path.to_path_buf()).or_insert_with(|| Node {
            state: NodeState {
                kind: NodeKind::Directory,
                owner: DEFAULT_OWNER.into(),
                group: DEFAULT_OWNER.into(),
                mode: DEFAULT_DIR_MODE,
            },
            contents: String::new(),
        });
    }

    fn insert_file(&mut self, path: &Path, contents: &str) {
        let node = self.nodes.entry(path.to_path_buf()).or_insert_with(|| Node {
            state: NodeState {
                kind: NodeKind::File,
                owner: DEFAULT_OWNER.into(),
                group: DEFAULT_OWNER.into(),
                mode: DEFAULT_FILE_MODE,
            },
            contents: String::new(),
        });
        node.contents = contents.to_string();
    }

    fn insert_parents(&mut self, path: &Path) {
        let parents: Vec<_> = path.ancestors().skip(1).map(Path::to_path_buf).collect();
        for parent in parents.into_iter().rev() {
            self.insert_dir(&parent);
        }
    }

    fn check_mutable(&self, path: &Path) -> Result<(), HostError> {
        if self.failing.contains(path) {
            return Err(permission_denied(path));
        }
        Ok(())
    }

    fn node_mut(&mut self, path: &Path) -> Result<&mut Node, HostError> {
        self.nodes
            .get_mut(path)
            .ok_or_else(|| HostError::NotFound(path.to_path_buf()))
    }

    fn parent_is_dir(&self, path: &Path) -> bool {
        path.parent().is_none_or(|parent| {
            self.nodes
                .get(parent)
                .is_some_and(|node| node.state.kind == NodeKind::Directory)
        })
    }
}

fn permission_denied(path: &Path) -> HostError {
    HostError::Io {
        path: path.to_path_buf(),
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    }
}

impl Probe for MemoryHost {
    fn package_installed(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.packages.contains(name))
    }

    fn stat(&self, path: &Path) -> Result<Option<NodeState>, HostError> {
        Ok(self.nodes.get(path).map(|node| node.state.clone()))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, HostError> {
        if self.unreadable.contains(path) {
            return Err(permission_denied(path));
        }

        match self.nodes.get(path) {
            Some(node) if node.state.kind == NodeKind::File => Ok(node.contents.clone()),
            Some(_) => Err(HostError::Io {
                path: path.to_path_buf(),
                source: io::Error::other("is a directory"),
            }),
            None => Err(HostError::NotFound(path.to_path_buf())),
        }
    }
}

impl Host for MemoryHost {
    fn install_package(&mut self, name: &str) -> Result<(), HostError> {
        self.packages.insert(name.to_string());
        for (path, contents) in self.package_files.get(name).cloned().unwrap_or_default() {
            if !self.nodes.contains_key(&path) {
                self.insert_parents(&path);
                self.insert_file(&path, &contents);
            }
        }
        self.journal.push(Operation::InstallPackage(name.to_string()));
        Ok(())
    }

    fn remove_package(&mut self, name: &str) -> Result<(), HostError> {
        self.packages.remove(name);
        self.journal.push(Operation::RemovePackage(name.to_string()));
        Ok(())
    }

    fn create_dir(&mut self, path: &Path) -> Result<(), HostError> {
        self.check_mutable(path)?;
        if !self.parent_is_dir(path) {
            return Err(HostError::NotFound(path.to_path_buf()));
        }
        if self.nodes.contains_key(path) {
            return Err(HostError::Io {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }

        self.insert_dir(path);
        self.journal.push(Operation::CreateDir(path.to_path_buf()));
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), HostError> {
        self.check_mutable(path)?;
        if !self.parent_is_dir(path) {
            return Err(HostError::NotFound(path.to_path_buf()));
        }

        self.insert_file(path, contents);
        self.journal.push(Operation::WriteFile(path.to_path_buf()));
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<(), HostError> {
        self.check_mutable(path)?;
        self.nodes
            .remove(path)
            .ok_or_else(|| HostError::NotFound(path.to_path_buf()))?;
        self.journal.push(Operation::RemoveFile(path.to_path_buf()));
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path) -> Result<(), HostError> {
        self.check_mutable(path)?;
        let has_children = self
            .nodes
            .keys()
            .any(|other| other.parent() == Some(path));
        if has_children {
            return Err(HostError::Io {
                path: path.to_path_buf(),
                source: io::Error::other("directory not empty"),
            });
        }
        self.nodes
            .remove(path)
            .ok_or_else(|| HostError::NotFound(path.to_path_buf()))?;
        self.journal.push(Operation::RemoveDir(path.to_path_buf()));
        Ok(())
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<(), HostError> {
        self.check_mutable(path)?;
        self.node_mut(path)?.state.mode = mode & 0o7777;
        self.journal.push(Operation::SetMode(path.to_path_buf(), mode));
        Ok(())
    }

    fn set_owner(
        &mut self,
        path: &Path,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), HostError> {
        self.check_mutable(path)?;
        let node = self.node_mut(path)?;
        if let Some(owner) = owner {
            node.state.owner = owner.to_string();
        }
        if let Some(group) = group {
            node.state.group = group.to_string();
        }
        self.journal.push(Operation::SetOwner(path.to_path_buf()));
        Ok(())
    }
}
