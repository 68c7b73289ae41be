//! Access to the machine that is being converged.
//!
//! The [engine](crate::engine) only ever talks to a [Host]. Reads go through the
//! read-only [Probe] half, which is also all a [Guard](crate::model::Guard) gets
//! to see. Two implementations exist:
//!
//! - [LocalHost]: the real filesystem below a root prefix plus the system package manager.
//! - [MemoryHost]: an in-memory simulation with an operation journal.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use derive_more::{Display, Error};

mod local;
mod memory;
mod package;

pub use local::LocalHost;
pub use memory::{MemoryHost, Operation};
pub use package::PackageManager;

/// Type of a filesystem node.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, serde::Serialize)]
pub enum NodeKind {
    #[display("file")]
    File,
    #[display("directory")]
    Directory,
}

/// Observed state of a filesystem node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub kind: NodeKind,
    pub owner: String,
    pub group: String,
    /// Permission bits only (`0o7777` mask).
    pub mode: u32,
}

/// Errors raised while reading or changing the state of a [Host].
#[derive(Debug, Display, Error)]
pub enum HostError {
    /// Filesystem operation on `path` failed.
    #[display("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// An external program could not be spawned.
    #[display("Failed to execute `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    /// An external program exited unsuccessfully.
    #[display("`{program}` failed ({status}): {stderr}")]
    Command {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    /// The user name can't be resolved.
    #[display("Unknown user: {_0}")]
    UnknownUser(#[error(ignore)] String),
    /// The group name can't be resolved.
    #[display("Unknown group: {_0}")]
    UnknownGroup(#[error(ignore)] String),
    /// The node to read or change doesn't exist.
    #[display("No such file or directory: {}", _0.display())]
    NotFound(#[error(ignore)] PathBuf),
}

impl HostError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Read-only view of the system state.
pub trait Probe {
    /// Returns if the package `name` is installed.
    fn package_installed(&self, name: &str) -> Result<bool, HostError>;

    /// Returns the state of the node at `path` or [None] if there is none.
    fn stat(&self, path: &Path) -> Result<Option<NodeState>, HostError>;

    /// Reads the contents of the file at `path`.
    fn read_to_string(&self, path: &Path) -> Result<String, HostError>;
}

/// Mutating access to the system.
///
/// Every operation is expected to be a single, minimal corrective action.
/// Deciding *whether* an action is needed is the job of the engine.
pub trait Host: Probe {
    fn install_package(&mut self, name: &str) -> Result<(), HostError>;

    fn remove_package(&mut self, name: &str) -> Result<(), HostError>;

    /// Creates a single directory. The parent has to exist.
    fn create_dir(&mut self, path: &Path) -> Result<(), HostError>;

    /// Creates or truncates the file at `path` and writes `contents`.
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), HostError>;

    fn remove_file(&mut self, path: &Path) -> Result<(), HostError>;

    /// Removes an empty directory.
    fn remove_dir(&mut self, path: &Path) -> Result<(), HostError>;

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<(), HostError>;

    /// Changes owner and/or group. [None] leaves the respective id untouched.
    fn set_owner(
        &mut self,
        path: &Path,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), HostError>;
}
