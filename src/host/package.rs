use std::path::Path;
use std::process::Command;

use clap::ValueEnum;
use derive_more::Display;

use super::HostError;

/// Package manager used by a [LocalHost](super::LocalHost).
///
/// The package manager itself is external; this only knows how to ask it
/// whether a package is installed and how to install or remove one.
#[derive(
    Copy, Clone, Debug, Display, Default, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// `rpm` for queries and `dnf` for changes (RHEL, Fedora, Rocky, ...).
    #[default]
    #[display("rpm")]
    Rpm,
    /// `dpkg-query` for queries and `apt-get` for changes (Debian, Ubuntu).
    #[display("dpkg")]
    Dpkg,
}

impl PackageManager {
    pub(super) fn is_installed(self, root: &Path, name: &str) -> Result<bool, HostError> {
        let mut command = match self {
            Self::Rpm => {
                let mut command = Command::new("rpm");
                command.arg("--root").arg(root).arg("-q").arg(name);
                command
            }
            Self::Dpkg => {
                let mut command = Command::new("dpkg-query");
                command
                    .arg("--admindir")
                    .arg(root.join("var/lib/dpkg"))
                    .arg("-W")
                    .arg("-f=${Status}")
                    .arg(name);
                command
            }
        };

        let output = command.output().map_err(|source| HostError::Spawn {
            program: self.query_program().to_string(),
            source,
        })?;
        relay_stderr(&output.stderr);

        // Both tools exit non-zero for unknown packages.
        if !output.status.success() {
            return Ok(false);
        }

        Ok(match self {
            Self::Rpm => true,
            Self::Dpkg => dpkg_status_installed(&String::from_utf8_lossy(&output.stdout)),
        })
    }

    pub(super) fn install(self, root: &Path, name: &str) -> Result<(), HostError> {
        let mut command = self.change_command(root);
        command.arg("install").arg(name);
        self.run_change(command)
    }

    pub(super) fn remove(self, root: &Path, name: &str) -> Result<(), HostError> {
        let mut command = self.change_command(root);
        command.arg("remove").arg(name);
        self.run_change(command)
    }

    fn query_program(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Dpkg => "dpkg-query",
        }
    }

    fn change_program(self) -> &'static str {
        match self {
            Self::Rpm => "dnf",
            Self::Dpkg => "apt-get",
        }
    }

    fn change_command(self, root: &Path) -> Command {
        let mut command = Command::new(self.change_program());
        command.arg("-y");
        match self {
            Self::Rpm => {
                command.arg("--installroot").arg(root);
            }
            Self::Dpkg => {
                command.arg("-o").arg(format!("RootDir={}", root.display()));
                command.env("DEBIAN_FRONTEND", "noninteractive");
            }
        }
        command
    }

    fn run_change(self, mut command: Command) -> Result<(), HostError> {
        let program = self.change_program().to_string();
        log::trace!(target: "host::package", "Running {command:?}");

        let output = command.output().map_err(|source| HostError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(HostError::Command {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().into(),
            });
        }
        relay_stderr(&output.stderr);

        Ok(())
    }
}

/// Classifies a dpkg `${Status}` line (`<want> <flag> <status>`).
///
/// `dpkg-query` also succeeds for packages it merely remembers, e.g.
/// `purge ok not-installed` or `deinstall ok config-files`.
fn dpkg_status_installed(status: &str) -> bool {
    let mut words = status.split_whitespace();
    let (Some(_want), Some(flag), Some(state), None) =
        (words.next(), words.next(), words.next(), words.next())
    else {
        return false;
    };
    flag == "ok" && state == "installed"
}

fn relay_stderr(stderr: &[u8]) {
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.trim().is_empty() {
        log::warn!(target: "host::package", "{}", stderr.trim_end());
    }
}
