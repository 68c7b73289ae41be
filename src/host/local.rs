use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use super::{Host, HostError, NodeKind, NodeState, PackageManager, Probe};

const PASSWD: &str = "etc/passwd";
const GROUP: &str = "etc/group";

/// The real machine, seen through a root prefix.
///
/// All resource paths are absolute paths *inside* the root. With the default
/// root `/` they are used as is, otherwise they are re-rooted below it, which
/// allows converging a chroot or a scratch directory.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
    package_manager: PackageManager,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(PathBuf::from("/"), PackageManager::default())
    }
}

impl LocalHost {
    pub fn new(root: PathBuf, package_manager: PackageManager) -> Self {
        if root.is_relative() {
            log::warn!(target: "host::local", "root is relative: {}", root.display());
        }

        Self {
            root,
            package_manager,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a path inside the managed system to the path on this machine.
    fn resolve(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root.join(relative)
    }

    fn lookup_id(&self, database: &str, name: &str) -> Result<Option<u32>, HostError> {
        let path = self.root.join(database);
        let db = fs::read_to_string(&path).map_err(|e| HostError::io(&path, e))?;
        Ok(id_by_name(&db, name))
    }

    fn lookup_name(&self, database: &str, id: u32) -> Result<String, HostError> {
        let path = self.root.join(database);
        let name = match fs::read_to_string(&path) {
            Ok(db) => name_by_id(&db, id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(HostError::io(&path, e)),
        };

        // unnamed ids are reported numerically, like `ls -l` does
        Ok(name.unwrap_or_else(|| id.to_string()))
    }
}

/// Finds the numeric id of `name` in a passwd(5)/group(5) formatted database.
fn id_by_name(db: &str, name: &str) -> Option<u32> {
    db.lines().find_map(|line| {
        let mut fields = line.split(':');
        let entry = fields.next()?;
        if entry != name {
            return None;
        }
        fields.nth(1)?.parse().ok()
    })
}

fn name_by_id(db: &str, id: u32) -> Option<String> {
    db.lines().find_map(|line| {
        let fields: Vec<_> = line.split(':').collect();
        let entry_id: u32 = fields.get(2)?.parse().ok()?;
        (entry_id == id).then(|| fields[0].to_string())
    })
}

impl Probe for LocalHost {
    fn package_installed(&self, name: &str) -> Result<bool, HostError> {
        self.package_manager.is_installed(&self.root, name)
    }

    fn stat(&self, path: &Path) -> Result<Option<NodeState>, HostError> {
        let local = self.resolve(path);
        let metadata = match fs::symlink_metadata(&local) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HostError::io(&local, e)),
        };

        let kind = if metadata.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };

        Ok(Some(NodeState {
            kind,
            owner: self.lookup_name(PASSWD, metadata.uid())?,
            group: self.lookup_name(GROUP, metadata.gid())?,
            mode: metadata.mode() & 0o7777,
        }))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, HostError> {
        let local = self.resolve(path);
        fs::read_to_string(&local).map_err(|e| HostError::io(&local, e))
    }
}

impl Host for LocalHost {
    fn install_package(&mut self, name: &str) -> Result<(), HostError> {
        log::debug!(target: "host::local", "Install package {name} using {}", self.package_manager);
        self.package_manager.install(&self.root, name)
    }

    fn remove_package(&mut self, name: &str) -> Result<(), HostError> {
        log::debug!(target: "host::local", "Remove package {name} using {}", self.package_manager);
        self.package_manager.remove(&self.root, name)
    }

    fn create_dir(&mut self, path: &Path) -> Result<(), HostError> {
        let local = self.resolve(path);
        log::trace!(target: "host::local", "mkdir {}", local.display());
        fs::create_dir(&local).map_err(|e| HostError::io(&local, e))
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), HostError> {
        let local = self.resolve(path);
        log::trace!(target: "host::local", "write {}", local.display());
        fs::write(&local, contents).map_err(|e| HostError::io(&local, e))
    }

    fn remove_file(&mut self, path: &Path) -> Result<(), HostError> {
        let local = self.resolve(path);
        log::trace!(target: "host::local", "rm {}", local.display());
        fs::remove_file(&local).map_err(|e| HostError::io(&local, e))
    }

    fn remove_dir(&mut self, path: &Path) -> Result<(), HostError> {
        let local = self.resolve(path);
        log::trace!(target: "host::local", "rmdir {}", local.display());
        fs::remove_dir(&local).map_err(|e| HostError::io(&local, e))
    }

    fn set_mode(&mut self, path: &Path, mode: u32) -> Result<(), HostError> {
        let local = self.resolve(path);
        log::trace!(target: "host::local", "chmod {mode:04o} {}", local.display());
        fs::set_permissions(&local, Permissions::from_mode(mode))
            .map_err(|e| HostError::io(&local, e))
    }

    fn set_owner(
        &mut self,
        path: &Path,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), HostError> {
        let uid = owner
            .map(|name| {
                self.lookup_id(PASSWD, name)?
                    .ok_or_else(|| HostError::UnknownUser(name.to_string()))
            })
            .transpose()?;
        let gid = group
            .map(|name| {
                self.lookup_id(GROUP, name)?
                    .ok_or_else(|| HostError::UnknownGroup(name.to_string()))
            })
            .transpose()?;

        let local = self.resolve(path);
        log::trace!(target: "host::local", "chown {uid:?}:{gid:?} {}", local.display());
        std::os::unix::fs::chown(&local, uid, gid).map_err(|e| HostError::io(&local, e))
    }
}
