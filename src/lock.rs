//! Serializes convergence runs against the same system.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum LockError {
    #[display("Another run holds {}", path.display())]
    Held { path: PathBuf },
    #[display("Creating lock file {} failed: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Exclusive lock on a run, released on drop.
///
/// The lock is a file holding the owner's pid. A stale file left by a crashed
/// run has to be removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let mut file = match File::create_new(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held { path })
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };

        if let Err(source) = writeln!(file, "{}", std::process::id()) {
            let _ = std::fs::remove_file(&path);
            return Err(LockError::Io { path, source });
        }

        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Releasing run lock {} failed: {e}", self.path.display());
        }
    }
}
