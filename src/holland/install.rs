//! Holland package and its configuration tree (`holland::install`).

use super::config::{HollandSettings, LoggingSettings};
use super::{
    templates, Catalog, CatalogError, BACKUPSETS_DIR, CONFIG_DIR, MAIN_CONFIG, PACKAGE,
    PROVIDERS_DIR,
};
use crate::model::{FileContent, Node, Package, Resource, ResourceHandle};

/// Resources every other part of the catalog builds on.
#[derive(Debug, Clone, Copy)]
pub struct Installation {
    pub package: ResourceHandle,
    pub config_dir: ResourceHandle,
    pub backupsets_dir: ResourceHandle,
    pub providers_dir: ResourceHandle,
    pub main_config: ResourceHandle,
}

fn managed_dir(path: &str) -> Resource {
    Resource::directory(Node::new(path).owner("root").group("root").mode(0o750))
}

/// Declares the Holland package, its configuration directories and
/// `holland.conf`.
pub(super) fn declare(
    catalog: &mut Catalog,
    settings: &HollandSettings,
    logging: &LoggingSettings,
) -> Result<Installation, CatalogError> {
    let package = catalog.declare(Resource::package(Package::new(PACKAGE)))?;

    let config_dir = catalog.declare(managed_dir(CONFIG_DIR))?;
    catalog.graph.require(config_dir, package);

    let mut subdir = |path: &str| -> Result<ResourceHandle, CatalogError> {
        let dir = catalog.declare(managed_dir(path))?;
        catalog.graph.require(dir, package);
        catalog.graph.require(dir, config_dir);
        Ok(dir)
    };
    let backupsets_dir = subdir(BACKUPSETS_DIR)?;
    let providers_dir = subdir(PROVIDERS_DIR)?;

    let main_config = catalog.declare(Resource::file(
        Node::new(MAIN_CONFIG)
            .owner("root")
            .group("root")
            .mode(0o640)
            .content(FileContent::Seed(templates::main_config(settings, logging))),
    ))?;
    catalog.graph.require(main_config, package);
    catalog.graph.require(main_config, config_dir);

    Ok(Installation {
        package,
        config_dir,
        backupsets_dir,
        providers_dir,
        main_config,
    })
}
