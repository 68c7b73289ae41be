//! Global Holland settings in `holland.conf` (`holland::config`).

use std::path::PathBuf;

use derive_more::Display;

use super::{Catalog, CatalogError, Installation, DEFAULT_BACKUPSET, MAIN_CONFIG};
use crate::lens::KeyPath;
use crate::model::{ConfigEdit, Guard, Node, Resource, ResourceHandle};

/// The `[holland]` section.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HollandSettings {
    /// Top-level directory backups are written to.
    pub backup_directory: PathBuf,

    /// `PATH` Holland runs its plugins with.
    pub path: String,

    /// Umask of created backup files, as octal string.
    pub umask: String,

    /// Directories Holland loads plugins from.
    pub plugin_dirs: Vec<PathBuf>,
}

impl Default for HollandSettings {
    fn default() -> Self {
        Self {
            backup_directory: PathBuf::from("/var/spool/holland"),
            path: "/usr/local/bin:/usr/local/sbin:/bin:/sbin:/usr/bin:/usr/sbin".into(),
            umask: "0007".into(),
            plugin_dirs: vec![PathBuf::from("/usr/share/holland/plugins")],
        }
    }
}

impl HollandSettings {
    /// Keys of the `[holland]` section in the order Holland documents them.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let plugin_dirs: Vec<_> = self
            .plugin_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect();

        vec![
            ("backup_directory", self.backup_directory.display().to_string()),
            ("path", self.path.clone()),
            ("umask", self.umask.clone()),
            ("plugin_dirs", plugin_dirs.join(", ")),
        ]
    }
}

/// Verbosity of Holland's own log file.
#[derive(
    Copy, Clone, Debug, Display, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HollandLogLevel {
    #[display("debug")]
    Debug,
    #[default]
    #[display("info")]
    Info,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
    #[display("critical")]
    Critical,
}

/// The `[logging]` section.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filename: PathBuf,
    pub level: HollandLogLevel,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("/var/log/holland/holland.log"),
            level: HollandLogLevel::default(),
        }
    }
}

impl LoggingSettings {
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("filename", self.filename.display().to_string()),
            ("level", self.level.to_string()),
        ]
    }
}

/// Declares one guarded edit per global setting.
///
/// Edits only apply while `holland.conf` has exactly one `[holland]` section,
/// so a file that was set up by hand in an unexpected way is left alone.
pub(super) fn declare(
    catalog: &mut Catalog,
    install: &Installation,
    settings: &HollandSettings,
    logging: &LoggingSettings,
) -> Result<Vec<ResourceHandle>, CatalogError> {
    let entries = settings
        .entries()
        .into_iter()
        .map(|(key, value)| (KeyPath::new("holland", key), value))
        .chain(
            logging
                .entries()
                .into_iter()
                .map(|(key, value)| (KeyPath::new("logging", key), value)),
        );

    let mut handles = Vec::new();
    for (key, value) in entries {
        let edit = catalog.declare(Resource::config_edit(
            ConfigEdit::new(MAIN_CONFIG, key, value)
                .only_if(Guard::single_section(MAIN_CONFIG, "holland")),
        ))?;
        catalog.graph.require(edit, install.main_config);
        handles.push(edit);
    }

    Ok(handles)
}

/// Declares removal of the placeholder backup set Holland's package ships.
///
/// It only runs when notified, i.e. after a real backup set got registered.
pub(super) fn declare_remove_default(
    catalog: &mut Catalog,
    install: &Installation,
) -> Result<ResourceHandle, CatalogError> {
    let remove_default =
        catalog.declare(Resource::file(Node::new(DEFAULT_BACKUPSET).absent()).refreshonly())?;
    catalog.graph.require(remove_default, install.package);
    Ok(remove_default)
}
