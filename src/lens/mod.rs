//! Reading and editing Holland's INI-style configuration files.
//!
//! Holland's configuration consists of `[section]` headers followed by
//! `key = value` lines. Comments start with `#` or `;`. List values such as
//! `backupsets` or `plugin_dirs` are comma separated.
//!
//! [IniDocument] edits a file in place: comments, blank lines and the order of
//! keys are kept, and an unchanged document renders to the exact input.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use derive_more::{Display, Error};
use regex::Regex;

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]+)\]\s*$").unwrap());
static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^=#;\[\s][^=]*?)\s*=\s*(.*?)\s*$").unwrap());

/// A key path is neither `section/key` nor `section.key`.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("Invalid key path (expected `section/key`): {_0:?}")]
pub struct InvalidKeyPath(#[error(ignore)] pub String);

/// Address of a single key inside an [IniDocument].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath {
    pub section: String,
    pub key: String,
}

impl KeyPath {
    pub fn new(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
        }
    }
}

impl FromStr for KeyPath {
    type Err = InvalidKeyPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('/') { '/' } else { '.' };
        let invalid = || InvalidKeyPath(s.to_string());

        let (section, key) = s.split_once(separator).ok_or_else(invalid)?;
        let (section, key) = (section.trim(), key.trim());
        if section.is_empty() || key.is_empty() || key.contains(separator) {
            return Err(invalid());
        }

        Ok(Self::new(section, key))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.section, self.key)
    }
}

#[derive(Clone, Debug)]
enum Line {
    Section(String),
    Entry { key: String, value: String },
    Other,
}

/// A parsed INI document that remembers its original text.
#[derive(Clone, Debug)]
pub struct IniDocument {
    raw: Vec<String>,
    lines: Vec<Line>,
    trailing_newline: bool,
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let raw: Vec<String> = text.lines().map(str::to_string).collect();
        let lines = raw.iter().map(|line| classify(line)).collect();

        Self {
            raw,
            lines,
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    /// Number of sections called `name`.
    pub fn section_count(&self, name: &str) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, Line::Section(section) if section == name))
            .count()
    }

    /// Value of `key` in the first section called `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let (start, end) = self.section_range(section)?;
        match &self.lines[self.find_entry(start, end, key)?] {
            Line::Entry { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_path(&self, path: &KeyPath) -> Option<&str> {
        self.get(&path.section, &path.key)
    }

    /// Comma separated list stored under `key`. Missing keys are empty lists.
    pub fn list(&self, section: &str, key: &str) -> Vec<String> {
        self.get(section, key).map(split_list).unwrap_or_default()
    }

    /// Sets `key` in the first section called `section`.
    ///
    /// Missing keys are appended to the section, a missing section is appended
    /// to the document. Surrounding whitespace of `value` is dropped, as it
    /// wouldn't survive parsing. Returns if the document changed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> bool {
        let value = value.trim();
        let Some((start, end)) = self.section_range(section) else {
            if self.raw.last().is_some_and(|line| !line.trim().is_empty()) {
                self.push(String::new(), Line::Other);
            }
            self.push(format!("[{section}]"), Line::Section(section.to_string()));
            self.push(format_entry(key, value), entry(key, value));
            return true;
        };

        if let Some(idx) = self.find_entry(start, end, key) {
            if matches!(&self.lines[idx], Line::Entry { value: current, .. } if current == value) {
                return false;
            }
            self.raw[idx] = format_entry(key, value);
            self.lines[idx] = entry(key, value);
            return true;
        }

        // keep trailing blank lines and comments behind the new key
        let insert_at = (start + 1..end)
            .rev()
            .find(|&idx| matches!(self.lines[idx], Line::Entry { .. }))
            .map_or(start + 1, |idx| idx + 1);
        self.raw.insert(insert_at, format_entry(key, value));
        self.lines.insert(insert_at, entry(key, value));
        true
    }

    pub fn set_path(&mut self, path: &KeyPath, value: &str) -> bool {
        self.set(&path.section, &path.key, value)
    }

    /// Adds `item` to the list under `key` unless it is already a member.
    ///
    /// Returns if the document changed.
    pub fn list_insert(&mut self, section: &str, key: &str, item: &str) -> bool {
        let item = item.trim();
        let mut items = self.list(section, key);
        if items.iter().any(|existing| existing == item) {
            return false;
        }
        items.push(item.to_string());
        self.set(section, key, &items.join(", "))
    }

    fn push(&mut self, raw: String, line: Line) {
        self.raw.push(raw);
        self.lines.push(line);
    }

    /// Index of the header and the end (exclusive) of the first section `name`.
    fn section_range(&self, name: &str) -> Option<(usize, usize)> {
        let start = self
            .lines
            .iter()
            .position(|line| matches!(line, Line::Section(section) if section == name))?;
        let end = self.lines[start + 1..]
            .iter()
            .position(|line| matches!(line, Line::Section(_)))
            .map_or(self.lines.len(), |offset| start + 1 + offset);
        Some((start, end))
    }

    fn find_entry(&self, start: usize, end: usize, key: &str) -> Option<usize> {
        (start + 1..end).find(|&idx| matches!(&self.lines[idx], Line::Entry { key: k, .. } if k == key))
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, line) in self.raw.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
        }
        if self.trailing_newline && !self.raw.is_empty() {
            f.write_str("\n")?;
        }
        Ok(())
    }
}

fn classify(line: &str) -> Line {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Line::Other;
    }
    if let Some(caps) = SECTION_RE.captures(line) {
        return Line::Section(caps[1].trim().to_string());
    }
    if let Some(caps) = ENTRY_RE.captures(line) {
        return entry(&caps[1], &caps[2]);
    }
    Line::Other
}

fn entry(key: &str, value: &str) -> Line {
    Line::Entry {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Whether `value` can be stored as a single `key = value` line.
pub fn is_single_line(value: &str) -> bool {
    !value.contains(['\n', '\r'])
}

fn format_entry(key: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{key} =")
    } else {
        format!("{key} = {value}")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLLAND_CONF: &str = "\
## Root holland config file
[holland]
# paths where holland plugins may be found.
plugin_dirs = /usr/share/holland/plugins
backup_directory = /var/spool/holland
backupsets = default

[logging]
filename = /var/log/holland/holland.log
level = info
";

    #[test]
    fn unchanged_document_renders_verbatim() {
        let doc = IniDocument::parse(HOLLAND_CONF);
        assert_eq!(doc.to_string(), HOLLAND_CONF);

        let no_newline = "[a]\nb = c";
        assert_eq!(IniDocument::parse(no_newline).to_string(), no_newline);
    }

    #[test]
    fn reads_values_and_lists() {
        let doc = IniDocument::parse(HOLLAND_CONF);
        assert_eq!(doc.section_count("holland"), 1);
        assert_eq!(doc.section_count("mysqldump"), 0);
        assert_eq!(doc.get("logging", "level"), Some("info"));
        assert_eq!(doc.get("holland", "level"), None);
        assert_eq!(doc.list("holland", "backupsets"), vec!["default"]);
        assert!(doc.list("holland", "missing").is_empty());
    }

    #[test]
    fn set_replaces_existing_value_only_when_different() {
        let mut doc = IniDocument::parse(HOLLAND_CONF);
        assert!(!doc.set("logging", "level", "info"));
        assert!(doc.set("logging", "level", "debug"));
        assert_eq!(doc.get("logging", "level"), Some("debug"));
        assert!(doc.to_string().contains("level = debug\n"));
        assert!(doc.to_string().contains("# paths where holland plugins may be found.\n"));
    }

    #[test]
    fn padded_value_is_stored_trimmed() {
        let mut doc = IniDocument::parse(HOLLAND_CONF);
        assert!(doc.set("holland", "path", " /usr/bin "));
        assert!(doc.to_string().contains("path = /usr/bin\n"));

        let mut reread = IniDocument::parse(&doc.to_string());
        assert!(!reread.set("holland", "path", " /usr/bin "));
        assert!(!reread.list_insert("holland", "backupsets", " default "));
        assert!(!is_single_line("a\n[holland]"));
        assert!(is_single_line("/usr/bin"));
    }

    #[test]
    fn set_appends_key_after_last_entry_of_section() {
        let mut doc = IniDocument::parse(HOLLAND_CONF);
        assert!(doc.set("holland", "umask", "0007"));

        let rendered = doc.to_string();
        assert!(rendered.contains("backupsets = default\numask = 0007\n\n[logging]"));
    }

    #[test]
    fn set_appends_missing_section() {
        let mut doc = IniDocument::parse("[holland]\nbackupsets =\n");
        assert!(doc.set("logging", "level", "info"));
        assert_eq!(
            doc.to_string(),
            "[holland]\nbackupsets =\n\n[logging]\nlevel = info\n"
        );

        let mut empty = IniDocument::parse("");
        assert!(empty.set("holland", "umask", "0007"));
        assert_eq!(empty.to_string(), "[holland]\numask = 0007\n");
    }

    #[test]
    fn list_insert_is_idempotent() {
        let mut doc = IniDocument::parse(HOLLAND_CONF);
        assert!(doc.list_insert("holland", "backupsets", "mysqldump_backup"));
        assert!(!doc.list_insert("holland", "backupsets", "mysqldump_backup"));
        assert_eq!(
            doc.list("holland", "backupsets"),
            vec!["default", "mysqldump_backup"]
        );
        assert_eq!(doc.get("holland", "backupsets"), Some("default, mysqldump_backup"));
    }

    #[test]
    fn edits_only_touch_first_matching_section() {
        let mut doc = IniDocument::parse("[holland]\nbackupsets = a\n[holland]\nbackupsets = b\n");
        assert_eq!(doc.section_count("holland"), 2);
        assert!(doc.list_insert("holland", "backupsets", "c"));
        assert_eq!(
            doc.to_string(),
            "[holland]\nbackupsets = a, c\n[holland]\nbackupsets = b\n"
        );
    }

    #[test]
    fn parses_key_paths() {
        assert_eq!(
            "holland/backupsets".parse::<KeyPath>(),
            Ok(KeyPath::new("holland", "backupsets"))
        );
        assert_eq!(
            "logging.level".parse::<KeyPath>(),
            Ok(KeyPath::new("logging", "level"))
        );
        assert_eq!(
            "holland:backup/backups-to-keep".parse::<KeyPath>().map(|p| p.to_string()),
            Ok("holland:backup/backups-to-keep".to_string())
        );

        for invalid in ["holland", "/backupsets", "holland/", "a/b/c"] {
            assert_eq!(
                invalid.parse::<KeyPath>(),
                Err(InvalidKeyPath(invalid.to_string()))
            );
        }
    }
}
