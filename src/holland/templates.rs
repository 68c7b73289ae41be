//! Contents of the files Holland reads.

use super::config::{HollandSettings, LoggingSettings};
use super::plugin::{Plugin, Sections};
use super::BackupSet;
use crate::lens::IniDocument;

const MANAGED_HEADER: &str = "## Managed by holland-converge. Local changes will be overwritten.\n";

/// Initial `holland.conf`, written only if the package didn't ship one.
pub fn main_config(settings: &HollandSettings, logging: &LoggingSettings) -> String {
    let mut doc = IniDocument::parse("## Root holland config file\n");
    for (key, value) in settings.entries() {
        doc.set("holland", key, &value);
    }
    doc.set("holland", "backupsets", "");
    for (key, value) in logging.entries() {
        doc.set("logging", key, &value);
    }
    doc.to_string()
}

/// `/etc/holland/providers/<plugin>.conf`
pub fn provider_config(plugin: Plugin, sections: &Sections) -> String {
    let mut doc = IniDocument::parse(MANAGED_HEADER);
    write_sections(&mut doc, plugin, sections);
    doc.to_string()
}

/// `/etc/holland/backupsets/<name>.conf`
pub fn backupset_config(set: &BackupSet, sections: &Sections) -> String {
    let mut doc = IniDocument::parse(MANAGED_HEADER);
    for (key, value) in set.backup_entries() {
        doc.set("holland:backup", key, &value);
    }
    write_sections(&mut doc, set.plugin, sections);
    doc.to_string()
}

/// Writes the plugin's own section first, the others alphabetically.
fn write_sections(doc: &mut IniDocument, plugin: Plugin, sections: &Sections) {
    let plugin_section = plugin.to_string();
    let ordered = sections
        .get_key_value(&plugin_section)
        .into_iter()
        .chain(sections.iter().filter(|(name, _)| **name != plugin_section));

    for (section, entries) in ordered {
        for (key, value) in entries {
            doc.set(section, key, value);
        }
    }
}
