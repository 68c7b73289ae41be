//! Diffing a single resource against the live system and correcting it.

use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::host::{Host, HostError, NodeKind, NodeState};
use crate::lens::{self, IniDocument, KeyPath};
use crate::model::{
    ConfigEdit, Desired, Ensure, FileContent, GuardPredicateError, Node, Package, Registration,
    Resource, ResourceId,
};

/// Changing the system failed.
#[derive(Debug, Display, Error, From)]
pub enum ApplyError {
    #[from]
    Host(HostError),
    /// A node of another type is in the way.
    #[display("Expected a {expected} at {} but found a {found}", path.display())]
    KindMismatch {
        path: PathBuf,
        expected: NodeKind,
        found: NodeKind,
    },
    /// The file an edit targets doesn't exist.
    #[display("Target file doesn't exist: {}", _0.display())]
    MissingTarget(#[error(ignore)] PathBuf),
    /// The value can't be stored as a single INI entry.
    #[display("Value {value:?} for {key} doesn't fit into a single entry")]
    InvalidValue { key: KeyPath, value: String },
}

/// Why a resource ended up failed.
#[derive(Debug, Display, Error, From)]
pub enum FailureCause {
    #[from]
    Guard(GuardPredicateError),
    #[from]
    Apply(ApplyError),
    /// A required resource failed, so this one was not attempted.
    #[display("Required resource {_0} failed")]
    DependencyFailed(#[error(ignore)] ResourceId),
}

impl From<HostError> for FailureCause {
    fn from(e: HostError) -> Self {
        Self::Apply(ApplyError::Host(e))
    }
}

/// Result of converging one resource.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Change {
    Unchanged,
    /// The system was (or, on a dry run, would have been) changed.
    Applied(Vec<String>),
    /// A difference exists but the guard didn't hold.
    Skipped(String),
}

/// Converges `resource`. On a dry run the differences are computed but
/// nothing is changed.
pub(super) fn converge(
    resource: &Resource,
    host: &mut dyn Host,
    dry_run: bool,
) -> Result<Change, FailureCause> {
    match &resource.desired {
        Desired::Package(package) => converge_package(package, host, dry_run),
        Desired::Directory(node) => converge_node(node, NodeKind::Directory, host, dry_run),
        Desired::File(node) => converge_node(node, NodeKind::File, host, dry_run),
        Desired::ConfigEdit(edit) => converge_config_edit(edit, host, dry_run),
        Desired::Registration(reg) => converge_registration(reg, host, dry_run),
    }
}

fn converge_package(
    package: &Package,
    host: &mut dyn Host,
    dry_run: bool,
) -> Result<Change, FailureCause> {
    let installed = host.package_installed(&package.name)?;

    match (package.ensure, installed) {
        (Ensure::Present, false) => {
            if !dry_run {
                host.install_package(&package.name)?;
            }
            Ok(Change::Applied(vec![format!("install {}", package.name)]))
        }
        (Ensure::Absent, true) => {
            if !dry_run {
                host.remove_package(&package.name)?;
            }
            Ok(Change::Applied(vec![format!("remove {}", package.name)]))
        }
        _ => Ok(Change::Unchanged),
    }
}

/// Single corrective step on a file or directory.
#[derive(Debug)]
enum NodeAction<'a> {
    CreateDir,
    Write(&'a str),
    Remove(NodeKind),
    Mode(u32),
    Owner(Option<&'a str>, Option<&'a str>),
}

impl NodeAction<'_> {
    fn describe(&self, path: &Path) -> String {
        let path = path.display();
        match self {
            Self::CreateDir => format!("mkdir {path}"),
            Self::Write(_) => format!("write {path}"),
            Self::Remove(NodeKind::Directory) => format!("rmdir {path}"),
            Self::Remove(NodeKind::File) => format!("rm {path}"),
            Self::Mode(mode) => format!("chmod {mode:04o} {path}"),
            Self::Owner(owner, group) => {
                format!("chown {}:{} {path}", owner.unwrap_or(""), group.unwrap_or(""))
            }
        }
    }

    fn apply(&self, path: &Path, host: &mut dyn Host) -> Result<(), HostError> {
        match self {
            Self::CreateDir => host.create_dir(path),
            Self::Write(contents) => host.write_file(path, contents),
            Self::Remove(NodeKind::Directory) => host.remove_dir(path),
            Self::Remove(NodeKind::File) => host.remove_file(path),
            Self::Mode(mode) => host.set_mode(path, *mode),
            Self::Owner(owner, group) => host.set_owner(path, *owner, *group),
        }
    }
}

fn converge_node(
    node: &Node,
    kind: NodeKind,
    host: &mut dyn Host,
    dry_run: bool,
) -> Result<Change, FailureCause> {
    let current = host.stat(&node.path)?;
    if let Some(state) = &current {
        if state.kind != kind {
            return Err(ApplyError::KindMismatch {
                path: node.path.clone(),
                expected: kind,
                found: state.kind,
            }
            .into());
        }
    }

    let actions = match (node.ensure, current) {
        (Ensure::Absent, None) => Vec::new(),
        (Ensure::Absent, Some(_)) => vec![NodeAction::Remove(kind)],
        (Ensure::Present, None) => node_creation(node, kind),
        (Ensure::Present, Some(state)) => node_corrections(node, &state, host)?,
    };

    if actions.is_empty() {
        return Ok(Change::Unchanged);
    }

    let mut applied = Vec::with_capacity(actions.len());
    for action in actions {
        if !dry_run {
            action.apply(&node.path, host)?;
        }
        applied.push(action.describe(&node.path));
    }
    Ok(Change::Applied(applied))
}

fn node_creation(node: &Node, kind: NodeKind) -> Vec<NodeAction<'_>> {
    let mut actions = vec![match kind {
        NodeKind::Directory => NodeAction::CreateDir,
        NodeKind::File => NodeAction::Write(match &node.content {
            Some(FileContent::Exact(text) | FileContent::Seed(text)) => text.as_str(),
            None => "",
        }),
    }];

    if let Some(mode) = node.mode {
        actions.push(NodeAction::Mode(mode));
    }
    if node.owner.is_some() || node.group.is_some() {
        actions.push(NodeAction::Owner(
            node.owner.as_deref(),
            node.group.as_deref(),
        ));
    }
    actions
}

fn node_corrections<'a>(
    node: &'a Node,
    state: &NodeState,
    host: &dyn Host,
) -> Result<Vec<NodeAction<'a>>, HostError> {
    let mut actions = Vec::new();

    if let (NodeKind::File, Some(FileContent::Exact(text))) = (state.kind, &node.content) {
        if host.read_to_string(&node.path)? != *text {
            actions.push(NodeAction::Write(text.as_str()));
        }
    }

    if let Some(mode) = node.mode.filter(|&mode| mode != state.mode) {
        actions.push(NodeAction::Mode(mode));
    }

    let owner = node.owner.as_deref().filter(|&owner| owner != state.owner);
    let group = node.group.as_deref().filter(|&group| group != state.group);
    if owner.is_some() || group.is_some() {
        actions.push(NodeAction::Owner(owner, group));
    }

    Ok(actions)
}

/// Loads the target of an edit. A missing target is only tolerated on a dry
/// run, where the file resource it requires would have created it.
fn load_target(
    file: &Path,
    host: &dyn Host,
    dry_run: bool,
) -> Result<IniDocument, FailureCause> {
    match host.read_to_string(file) {
        Ok(text) => Ok(IniDocument::parse(&text)),
        Err(HostError::NotFound(_)) if dry_run => Ok(IniDocument::parse("")),
        Err(HostError::NotFound(_)) => Err(ApplyError::MissingTarget(file.to_path_buf()).into()),
        Err(e) => Err(e.into()),
    }
}

fn converge_config_edit(
    edit: &ConfigEdit,
    host: &mut dyn Host,
    dry_run: bool,
) -> Result<Change, FailureCause> {
    if !lens::is_single_line(&edit.value) {
        return Err(ApplyError::InvalidValue {
            key: edit.key.clone(),
            value: edit.value.clone(),
        }
        .into());
    }

    let mut doc = load_target(&edit.file, host, dry_run)?;
    if !doc.set_path(&edit.key, &edit.value) {
        return Ok(Change::Unchanged);
    }

    if let Some(guard) = &edit.guard {
        if !guard.evaluate(&*host)? {
            return Ok(Change::Skipped(guard.to_string()));
        }
    }

    if !dry_run {
        host.write_file(&edit.file, &doc.to_string())?;
    }
    Ok(Change::Applied(vec![format!(
        "set {} = {} in {}",
        edit.key,
        edit.value,
        edit.file.display()
    )]))
}

fn converge_registration(
    reg: &Registration,
    host: &mut dyn Host,
    dry_run: bool,
) -> Result<Change, FailureCause> {
    if !lens::is_single_line(&reg.entry) || reg.entry.contains(',') {
        return Err(ApplyError::InvalidValue {
            key: reg.key.clone(),
            value: reg.entry.clone(),
        }
        .into());
    }

    let mut doc = load_target(&reg.file, host, dry_run)?;
    if !doc.list_insert(&reg.key.section, &reg.key.key, &reg.entry) {
        return Ok(Change::Unchanged);
    }

    if let Some(guard) = &reg.guard {
        if !guard.evaluate(&*host)? {
            return Ok(Change::Skipped(guard.to_string()));
        }
    }

    if !dry_run {
        host.write_file(&reg.file, &doc.to_string())?;
    }
    Ok(Change::Applied(vec![format!(
        "add {} to {} in {}",
        reg.entry,
        reg.key,
        reg.file.display()
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryHost, Operation, Probe};
    use crate::lens::KeyPath;
    use crate::model::Guard;

    const CONF: &str = "/etc/holland/holland.conf";

    #[test]
    fn package_is_installed_once() {
        let mut host = MemoryHost::new();
        let package = Resource::package(Package::new("holland"));

        assert!(matches!(converge(&package, &mut host, false), Ok(Change::Applied(_))));
        assert_eq!(converge(&package, &mut host, false).unwrap(), Change::Unchanged);
        assert_eq!(host.journal(), &[Operation::InstallPackage("holland".into())]);
    }

    #[test]
    fn new_directory_gets_mode_and_owner() {
        let mut host = MemoryHost::new();
        let dir = Resource::directory(
            Node::new("/etc/holland")
                .owner("root")
                .group("root")
                .mode(0o750),
        );

        let Change::Applied(actions) = converge(&dir, &mut host, false).unwrap() else {
            panic!("directory should be created");
        };
        assert_eq!(
            actions,
            vec![
                "mkdir /etc/holland",
                "chmod 0750 /etc/holland",
                "chown root:root /etc/holland"
            ]
        );
        assert_eq!(host.stat(Path::new("/etc/holland")).unwrap().unwrap().mode, 0o750);
        assert_eq!(converge(&dir, &mut host, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn existing_node_only_gets_differing_attributes_fixed() {
        let mut host = MemoryHost::new().with_file(CONF, "[holland]\n");
        let file = Resource::file(Node::new(CONF).owner("root").group("root").mode(0o640));

        let Change::Applied(actions) = converge(&file, &mut host, false).unwrap() else {
            panic!("mode should be corrected");
        };
        assert_eq!(actions, vec!["chmod 0640 /etc/holland/holland.conf"]);
    }

    #[test]
    fn seeded_content_is_not_enforced_later() {
        let mut host = MemoryHost::new().with_dir("/etc/holland");
        let file = Resource::file(
            Node::new(CONF).content(FileContent::Seed("[holland]\n".into())),
        );

        converge(&file, &mut host, false).unwrap();
        assert_eq!(host.contents(CONF), Some("[holland]\n"));

        host.write_file(Path::new(CONF), "[holland]\numask = 0007\n").unwrap();
        assert_eq!(converge(&file, &mut host, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn exact_content_is_rewritten() {
        let mut host = MemoryHost::new().with_file("/etc/holland/providers/mysqldump.conf", "old");
        let file = Resource::file(
            Node::new("/etc/holland/providers/mysqldump.conf")
                .content(FileContent::Exact("new".into())),
        );

        assert!(matches!(converge(&file, &mut host, false), Ok(Change::Applied(_))));
        assert_eq!(host.contents("/etc/holland/providers/mysqldump.conf"), Some("new"));
    }

    #[test]
    fn kind_mismatch_is_not_clobbered() {
        let mut host = MemoryHost::new().with_file("/etc/holland", "");
        let dir = Resource::directory(Node::new("/etc/holland"));

        let err = converge(&dir, &mut host, false).unwrap_err();
        assert!(matches!(
            err,
            FailureCause::Apply(ApplyError::KindMismatch { .. })
        ));
        assert!(host.journal().is_empty());
    }

    #[test]
    fn absent_file_is_removed() {
        let default = "/etc/holland/backupsets/default.conf";
        let mut host = MemoryHost::new().with_file(default, "");
        let file = Resource::file(Node::new(default).absent());

        assert!(matches!(converge(&file, &mut host, false), Ok(Change::Applied(_))));
        assert!(host.stat(Path::new(default)).unwrap().is_none());
        assert_eq!(converge(&file, &mut host, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn config_edit_false_guard_skips_without_writing() {
        let mut host = MemoryHost::new().with_file(CONF, "[holland]\n[holland]\n");
        let edit = Resource::config_edit(
            ConfigEdit::new(CONF, KeyPath::new("holland", "umask"), "0007")
                .only_if(Guard::single_section(CONF, "holland")),
        );

        assert!(matches!(
            converge(&edit, &mut host, false),
            Ok(Change::Skipped(_))
        ));
        assert!(host.journal().is_empty());
    }

    #[test]
    fn matching_value_needs_no_guard() {
        let mut host = MemoryHost::new()
            .with_file(CONF, "[holland]\numask = 0007\n")
            .with_unreadable("/etc/holland/guard");
        let edit = Resource::config_edit(
            ConfigEdit::new(CONF, KeyPath::new("holland", "umask"), "0007")
                .only_if(Guard::single_section("/etc/holland/guard", "holland")),
        );

        assert_eq!(converge(&edit, &mut host, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn unreadable_guard_target_fails() {
        let mut host = MemoryHost::new()
            .with_file(CONF, "[holland]\n")
            .with_file("/etc/holland/guard", "[holland]\n")
            .with_unreadable("/etc/holland/guard");
        let edit = Resource::config_edit(
            ConfigEdit::new(CONF, KeyPath::new("holland", "umask"), "0007")
                .only_if(Guard::single_section("/etc/holland/guard", "holland")),
        );

        assert!(matches!(
            converge(&edit, &mut host, false),
            Err(FailureCause::Guard(_))
        ));
    }

    #[test]
    fn registration_appends_entry_once() {
        let mut host = MemoryHost::new().with_file(CONF, "[holland]\nbackupsets = default\n");
        let reg = Resource::registration(
            Registration::new(CONF, KeyPath::new("holland", "backupsets"), "mongodump_backup")
                .only_if(Guard::single_section(CONF, "holland")),
        );

        assert!(matches!(converge(&reg, &mut host, false), Ok(Change::Applied(_))));
        assert_eq!(
            host.contents(CONF),
            Some("[holland]\nbackupsets = default, mongodump_backup\n")
        );
        assert_eq!(converge(&reg, &mut host, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn edit_of_missing_target_fails_unless_dry_run() {
        let mut host = MemoryHost::new();
        let edit = Resource::config_edit(ConfigEdit::new(
            CONF,
            KeyPath::new("logging", "level"),
            "info",
        ));

        assert!(matches!(
            converge(&edit, &mut host, false),
            Err(FailureCause::Apply(ApplyError::MissingTarget(_)))
        ));
        assert!(matches!(converge(&edit, &mut host, true), Ok(Change::Applied(_))));
        assert!(host.journal().is_empty());
    }

    #[test]
    fn multiline_values_are_rejected() {
        let original = "[holland]\nbackupsets = default\n";
        let mut host = MemoryHost::new().with_file(CONF, original);
        let edit = Resource::config_edit(ConfigEdit::new(
            CONF,
            KeyPath::new("holland", "path"),
            "/usr/bin\n[holland]",
        ));
        let reg = Resource::registration(Registration::new(
            CONF,
            KeyPath::new("holland", "backupsets"),
            "a, b",
        ));

        for resource in [edit, reg] {
            assert!(matches!(
                converge(&resource, &mut host, false),
                Err(FailureCause::Apply(ApplyError::InvalidValue { .. }))
            ));
        }
        assert_eq!(host.contents(CONF), Some(original));
        assert!(host.journal().is_empty());
    }
}
