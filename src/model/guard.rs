use std::fmt;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use crate::host::{HostError, Probe};
use crate::lens::IniDocument;

/// Condition that has to hold for a guarded resource to be applied.
///
/// Guards only get a read-only [Probe] and never change anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Guard {
    /// `file` contains exactly `equals` top-level sections named `section`.
    ///
    /// A missing file has no sections.
    SectionCount {
        file: PathBuf,
        section: String,
        equals: usize,
    },
    /// Something exists at the path.
    PathExists(PathBuf),
    /// Nothing exists at the path.
    PathAbsent(PathBuf),
}

/// A [Guard] could not be evaluated.
#[derive(Debug, Display, Error)]
#[display("Evaluating guard `{guard}` failed: {source}")]
pub struct GuardPredicateError {
    pub guard: String,
    pub source: HostError,
}

impl Guard {
    /// `file` has exactly one section named `section`.
    pub fn single_section(file: impl Into<PathBuf>, section: &str) -> Self {
        Self::SectionCount {
            file: file.into(),
            section: section.to_string(),
            equals: 1,
        }
    }

    pub fn evaluate<P: Probe + ?Sized>(&self, probe: &P) -> Result<bool, GuardPredicateError> {
        let wrap = |source| GuardPredicateError {
            guard: self.to_string(),
            source,
        };

        match self {
            Self::SectionCount {
                file,
                section,
                equals,
            } => {
                let text = match read_if_exists(probe, file).map_err(wrap)? {
                    Some(text) => text,
                    None => return Ok(*equals == 0),
                };
                Ok(IniDocument::parse(&text).section_count(section) == *equals)
            }
            Self::PathExists(path) => Ok(probe.stat(path).map_err(wrap)?.is_some()),
            Self::PathAbsent(path) => Ok(probe.stat(path).map_err(wrap)?.is_none()),
        }
    }
}

fn read_if_exists<P: Probe + ?Sized>(probe: &P, path: &Path) -> Result<Option<String>, HostError> {
    match probe.read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(HostError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionCount {
                file,
                section,
                equals,
            } => write!(f, "match {section} size == {equals} in {}", file.display()),
            Self::PathExists(path) => write!(f, "test -e {}", path.display()),
            Self::PathAbsent(path) => write!(f, "! test -e {}", path.display()),
        }
    }
}
