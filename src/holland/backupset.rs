//! Backup sets (`holland::backupset`).

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::plugin::{merge, Plugin, PluginResources, Sections};
use super::{templates, Catalog, CatalogError, Installation, BACKUPSETS_DIR, MAIN_CONFIG};
use crate::lens::KeyPath;
use crate::model::{FileContent, Guard, Node, Registration, Resource, ResourceHandle};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").unwrap());

fn default_backups_to_keep() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_purge_policy() -> String {
    "after-backup".into()
}

fn default_size_factor() -> f64 {
    1.0
}

/// A named backup job using one plugin.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackupSet {
    pub name: String,
    pub plugin: Plugin,

    #[serde(default = "default_backups_to_keep")]
    pub backups_to_keep: u32,

    #[serde(default = "default_true")]
    pub auto_purge_failures: bool,

    /// One of `manual`, `before-backup` or `after-backup`.
    #[serde(default = "default_purge_policy")]
    pub purge_policy: String,

    #[serde(default = "default_size_factor")]
    pub estimated_size_factor: f64,

    /// Plugin settings of this set, merged over the plugin's defaults.
    #[serde(default)]
    pub sections: Sections,
}

impl BackupSet {
    pub fn new(name: impl Into<String>, plugin: Plugin) -> Self {
        Self {
            name: name.into(),
            plugin,
            backups_to_keep: default_backups_to_keep(),
            auto_purge_failures: default_true(),
            purge_policy: default_purge_policy(),
            estimated_size_factor: default_size_factor(),
            sections: Sections::new(),
        }
    }

    /// Path of the set's configuration.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(BACKUPSETS_DIR).join(format!("{}.conf", self.name))
    }

    /// Keys of the `[holland:backup]` section.
    pub fn backup_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("plugin", self.plugin.to_string()),
            ("backups-to-keep", self.backups_to_keep.to_string()),
            (
                "auto-purge-failures",
                if self.auto_purge_failures { "yes" } else { "no" }.to_string(),
            ),
            ("purge-policy", self.purge_policy.clone()),
            (
                "estimated-size-factor",
                self.estimated_size_factor.to_string(),
            ),
        ]
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if !NAME_RE.is_match(&self.name) || self.name == "default" {
            return Err(CatalogError::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

/// Declares the set's configuration and its registration in `holland.conf`.
///
/// Registering the set triggers `remove_default`.
pub(super) fn declare(
    catalog: &mut Catalog,
    install: &Installation,
    plugin: &PluginResources,
    plugin_sections: Sections,
    remove_default: ResourceHandle,
    set: &BackupSet,
) -> Result<ResourceHandle, CatalogError> {
    set.validate()?;
    log::debug!(target: "holland", "Declaring backup set {} ({})", set.name, set.plugin);

    let sections = merge(plugin_sections, &set.sections);
    let file = catalog.declare(Resource::file(
        Node::new(set.path())
            .owner("root")
            .group("root")
            .mode(0o640)
            .content(FileContent::Exact(templates::backupset_config(set, &sections))),
    ))?;
    catalog.graph.require(file, install.backupsets_dir);
    catalog.graph.require(file, plugin.package);
    catalog.graph.require(file, plugin.provider_config);

    let registration = catalog.declare(Resource::registration(
        Registration::new(
            MAIN_CONFIG,
            KeyPath::new("holland", "backupsets"),
            set.name.as_str(),
        )
        .only_if(Guard::single_section(MAIN_CONFIG, "holland")),
    ))?;
    catalog.graph.require(registration, file);
    catalog.graph.notify(registration, remove_default);

    Ok(registration)
}
