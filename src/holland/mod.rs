//! Resources that install and configure [Holland][holland].
//!
//! [catalog] turns a [HollandConfig] into a [ResourceModel] and its
//! [DependencyGraph]:
//!
//! - the `holland` package, `/etc/holland` and its `backupsets` and
//!   `providers` directories, and a seeded `holland.conf`,
//! - guarded edits of the global settings in `holland.conf`,
//! - a package and provider configuration per enabled plugin,
//! - a configuration file and a registration in `holland.conf` per backup set.
//!
//! Registering a backup set removes the `default` set Holland ships.
//!
//! [holland]: https://github.com/holland-backup/holland

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

mod backupset;
mod config;
mod install;
mod plugin;
mod templates;

pub use backupset::BackupSet;
pub use config::{HollandLogLevel, HollandSettings, LoggingSettings};
pub use install::Installation;
pub use plugin::{Plugin, PluginConfig, PluginResources, Sections};

use crate::graph::DependencyGraph;
use crate::host::PackageManager;
use crate::lens;
use crate::model::{DuplicateResourceError, Resource, ResourceHandle, ResourceModel};

pub const PACKAGE: &str = "holland";
pub const CONFIG_DIR: &str = "/etc/holland";
pub const BACKUPSETS_DIR: &str = "/etc/holland/backupsets";
pub const PROVIDERS_DIR: &str = "/etc/holland/providers";
pub const MAIN_CONFIG: &str = "/etc/holland/holland.conf";
/// Placeholder backup set shipped with the package.
pub const DEFAULT_BACKUPSET: &str = "/etc/holland/backupsets/default.conf";

/// Everything configurable about a Holland installation.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HollandConfig {
    /// Package manager used to install Holland and its plugins.
    pub package_manager: PackageManager,
    pub holland: HollandSettings,
    pub logging: LoggingSettings,
    /// Enables the mysqldump plugin if present.
    pub mysqldump: Option<PluginConfig>,
    /// Enables the mongodump plugin if present.
    pub mongodump: Option<PluginConfig>,
    #[serde(rename = "backupset")]
    pub backupsets: Vec<BackupSet>,
}

impl HollandConfig {
    /// Reads the configuration at `path`.
    ///
    /// A missing file is created with the defaults, which are returned even
    /// if writing them fails.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(config_str) => toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    target: "holland",
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let config = Self::default();
                let config_str = toml::to_string_pretty(&config)?;
                if let Err(e) = std::fs::write(path, config_str) {
                    log::warn!(
                        target: "holland",
                        "Writing default config to {} failed: {e}",
                        path.display()
                    );
                }
                Ok(config)
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Configuration of `plugin`, [None] if it's disabled.
    pub fn plugin(&self, plugin: Plugin) -> Option<&PluginConfig> {
        match plugin {
            Plugin::MysqlDump => self.mysqldump.as_ref(),
            Plugin::MongoDump => self.mongodump.as_ref(),
        }
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = (Plugin, &PluginConfig)> {
        [Plugin::MysqlDump, Plugin::MongoDump]
            .into_iter()
            .filter_map(|plugin| self.plugin(plugin).map(|config| (plugin, config)))
    }

    /// Checks that every rendered value fits into a single INI line.
    fn validate(&self) -> Result<(), CatalogError> {
        for (key, value) in self.holland.entries() {
            check_value(&format!("holland/{key}"), &value)?;
        }
        for (key, value) in self.logging.entries() {
            check_value(&format!("logging/{key}"), &value)?;
        }
        for (plugin, config) in self.enabled_plugins() {
            check_sections(&plugin.to_string(), &config.provider)?;
        }
        for set in &self.backupsets {
            for (key, value) in set.backup_entries() {
                check_value(&format!("{}: holland:backup/{key}", set.name), &value)?;
            }
            check_sections(&set.name, &set.sections)?;
        }
        Ok(())
    }
}

fn check_value(key: &str, value: &str) -> Result<(), CatalogError> {
    if lens::is_single_line(value) {
        Ok(())
    } else {
        Err(CatalogError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn check_sections(owner: &str, sections: &Sections) -> Result<(), CatalogError> {
    for (section, entries) in sections {
        check_value(&format!("{owner}: section name"), section)?;
        for (key, value) in entries {
            check_value(&format!("{owner}: {section}/key name"), key)?;
            check_value(&format!("{owner}: {section}/{key}"), value)?;
        }
    }
    Ok(())
}

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("Reading {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[display("Parsing {} failed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[display("Rendering the default config failed: {_0}")]
    #[from]
    Render(toml::ser::Error),
}

#[derive(Debug, Display, Error, From)]
pub enum CatalogError {
    #[from]
    Duplicate(DuplicateResourceError),
    #[display("Backup set {set} uses plugin {plugin} which is not enabled")]
    DisabledPlugin {
        set: String,
        plugin: Plugin,
    },
    #[display("Invalid backup set name {_0:?}")]
    InvalidName(#[error(ignore)] String),
    /// The value would span several lines of an INI file.
    #[display("Value {value:?} of {key} must be a single line")]
    InvalidValue { key: String, value: String },
}

/// Resources and dependencies of a Holland installation.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    pub model: ResourceModel,
    pub graph: DependencyGraph,
}

impl Catalog {
    fn declare(&mut self, resource: Resource) -> Result<ResourceHandle, CatalogError> {
        Ok(self.model.declare(resource)?)
    }
}

/// Declares everything `config` describes.
///
/// # Errors
///
/// Fails if a value spans several lines, a backup set is invalid, uses a
/// disabled plugin or two backup sets share a name.
pub fn catalog(config: &HollandConfig) -> Result<Catalog, CatalogError> {
    config.validate()?;
    let mut catalog = Catalog::default();

    let install = install::declare(&mut catalog, &config.holland, &config.logging)?;
    self::config::declare(&mut catalog, &install, &config.holland, &config.logging)?;
    let remove_default = self::config::declare_remove_default(&mut catalog, &install)?;

    let mut plugins = BTreeMap::new();
    for (plugin, plugin_config) in config.enabled_plugins() {
        let resources = plugin::declare(&mut catalog, &install, plugin, plugin_config)?;
        plugins.insert(plugin, (resources, plugin_config.sections(plugin)));
    }

    for set in &config.backupsets {
        let Some((resources, sections)) = plugins.get(&set.plugin) else {
            return Err(CatalogError::DisabledPlugin {
                set: set.name.clone(),
                plugin: set.plugin,
            });
        };
        backupset::declare(
            &mut catalog,
            &install,
            resources,
            sections.clone(),
            remove_default,
            set,
        )?;
    }

    log::debug!(
        target: "holland",
        "Declared {} resources for {} backup sets",
        catalog.model.len(),
        config.backupsets.len()
    );
    Ok(catalog)
}
