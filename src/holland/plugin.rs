//! Holland backup plugins (`holland::mysqldump`, `holland::mongodump`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use derive_more::Display;

use super::{templates, Catalog, CatalogError, Installation, PACKAGE, PROVIDERS_DIR};
use crate::model::{FileContent, Node, Package, Resource, ResourceHandle};

/// Sections of an INI file: section -> key -> value.
pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

type Defaults = &'static [(&'static str, &'static [(&'static str, &'static str)])];

const MYSQLDUMP_DEFAULTS: Defaults = &[
    (
        "mysqldump",
        &[
            ("lock-method", "auto-detect"),
            ("databases", "\"*\""),
            ("exclude-databases", ""),
            ("stop-slave", "no"),
            ("bin-log-position", "no"),
            ("flush-logs", "no"),
            ("file-per-database", "yes"),
        ],
    ),
    ("compression", &[("method", "gzip"), ("level", "1")]),
];

const MONGODUMP_DEFAULTS: Defaults = &[
    ("mongodump", &[("host", "localhost"), ("additional-args", "")]),
    ("compression", &[("method", "gzip"), ("level", "1")]),
];

/// A database engine plugin shipped as its own package.
#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum Plugin {
    #[serde(rename = "mysqldump")]
    #[display("mysqldump")]
    MysqlDump,
    #[serde(rename = "mongodump")]
    #[display("mongodump")]
    MongoDump,
}

impl Plugin {
    /// Package providing the plugin.
    pub fn package(self) -> String {
        format!("{PACKAGE}-{self}")
    }

    /// Provider configuration holding the plugin's defaults.
    pub fn provider_config(self) -> PathBuf {
        PathBuf::from(PROVIDERS_DIR).join(format!("{self}.conf"))
    }

    /// Settings Holland ships for the plugin.
    pub fn default_sections(self) -> Sections {
        let sections = match self {
            Self::MysqlDump => MYSQLDUMP_DEFAULTS,
            Self::MongoDump => MONGODUMP_DEFAULTS,
        };

        sections
            .iter()
            .map(|(section, entries)| {
                let entries: BTreeMap<String, String> = entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                (section.to_string(), entries)
            })
            .collect()
    }
}

/// Configuration of an enabled plugin.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginConfig {
    /// Settings written to the provider configuration, merged over the
    /// defaults Holland ships.
    #[serde(default)]
    pub provider: Sections,
}

impl PluginConfig {
    pub fn sections(&self, plugin: Plugin) -> Sections {
        merge(plugin.default_sections(), &self.provider)
    }
}

/// Overlays `overrides` key by key onto `base`.
pub(super) fn merge(mut base: Sections, overrides: &Sections) -> Sections {
    for (section, entries) in overrides {
        let target = base.entry(section.clone()).or_default();
        for (key, value) in entries {
            target.insert(key.clone(), value.clone());
        }
    }
    base
}

/// Resources of a declared plugin.
#[derive(Debug, Clone, Copy)]
pub struct PluginResources {
    pub package: ResourceHandle,
    pub provider_config: ResourceHandle,
}

/// Declares the plugin package and its provider configuration.
pub(super) fn declare(
    catalog: &mut Catalog,
    install: &Installation,
    plugin: Plugin,
    config: &PluginConfig,
) -> Result<PluginResources, CatalogError> {
    log::debug!(target: "holland", "Declaring plugin {plugin}");

    let package = catalog.declare(Resource::package(Package::new(plugin.package())))?;
    catalog.graph.require(package, install.package);

    let provider_config = catalog.declare(Resource::file(
        Node::new(plugin.provider_config())
            .owner("root")
            .group("root")
            .mode(0o640)
            .content(FileContent::Exact(templates::provider_config(
                plugin,
                &config.sections(plugin),
            ))),
    ))?;
    catalog.graph.require(provider_config, package);
    catalog.graph.require(provider_config, install.providers_dir);

    Ok(PluginResources {
        package,
        provider_config,
    })
}
