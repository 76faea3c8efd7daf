//! Output Specifications
//!
//! Parses `Output` entries (`archive.zip:glob1,glob2@disk=2`) and the
//! `OutputDir` transfer destination.

use serde::Serialize;

use crate::error::{GeneratorError, Result};

/// Extensions of formats that do not shrink further when zipped.
const STORE_ONLY_EXTENSIONS: &[&str] = &[".root", ".zip", ".gz", ".bz2", ".xz"];

/// Zip compression level for an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// `zip -0`
    Store,
    /// `zip -9`
    Max,
}

impl Compression {
    /// The `zip` command line flag.
    pub fn zip_flag(self) -> &'static str {
        match self {
            Compression::Store => "-0",
            Compression::Max => "-9",
        }
    }
}

/// One parsed `Output` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Archive to create; `None` for files transferred as they are.
    pub archive: Option<String>,
    /// Glob patterns of the member files.
    pub patterns: Vec<String>,
}

impl OutputSpec {
    /// Parses an entry, discarding any `@` storage hint.
    pub fn parse(entry: &str) -> Self {
        let entry = strip_storage_hint(entry);
        match entry.split_once(':') {
            Some((archive, files)) => Self {
                archive: Some(archive.trim().to_string()),
                patterns: files
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            },
            None => Self {
                archive: None,
                patterns: vec![entry.trim().to_string()],
            },
        }
    }

    /// Store-only when any member is already compressed.
    pub fn compression(&self) -> Compression {
        let incompressible = self
            .patterns
            .iter()
            .any(|p| STORE_ONLY_EXTENSIONS.iter().any(|ext| p.ends_with(ext)));
        if incompressible {
            Compression::Store
        } else {
            Compression::Max
        }
    }
}

/// Removes the `@...` suffix of an output entry.
pub fn strip_storage_hint(entry: &str) -> &str {
    entry.split_once('@').map_or(entry, |(head, _)| head)
}

/// Where a job's files are transferred to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDestination {
    /// Plain filesystem path.
    Local(String),
    /// XRootD URL (`root://`).
    Xrootd(String),
}

impl OutputDestination {
    /// Classifies an output directory by its URL scheme.
    pub fn parse(dir: &str) -> Result<Self> {
        match dir.split_once("://") {
            None => Ok(OutputDestination::Local(dir.to_string())),
            Some(("root", _)) => Ok(OutputDestination::Xrootd(dir.to_string())),
            Some((scheme, _)) => Err(GeneratorError::UnsupportedProtocol {
                protocol: scheme.to_string(),
                destination: dir.to_string(),
            }),
        }
    }

    /// Protocol name used inside the worker script.
    pub fn protocol(&self) -> &'static str {
        match self {
            OutputDestination::Local(_) => "local",
            OutputDestination::Xrootd(_) => "root",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_entry_with_disk_hint() {
        let spec = OutputSpec::parse("results.zip:out1.root,out2.log@disk=2");
        assert_eq!(spec.archive.as_deref(), Some("results.zip"));
        assert_eq!(spec.patterns, vec!["out1.root", "out2.log"]);
    }

    #[test]
    fn test_bare_glob_entry() {
        let spec = OutputSpec::parse("qa_plots/*");
        assert_eq!(spec.archive, None);
        assert_eq!(spec.patterns, vec!["qa_plots/*"]);
    }

    #[test]
    fn test_compression_choice() {
        assert_eq!(
            OutputSpec::parse("a.zip:AliAOD*.root,std*").compression(),
            Compression::Store
        );
        assert_eq!(
            OutputSpec::parse("log.zip:std*,fileinfo*.log").compression(),
            Compression::Max
        );
        assert_eq!(Compression::Store.zip_flag(), "-0");
    }

    #[test]
    fn test_empty_patterns_are_dropped() {
        let spec = OutputSpec::parse("a.zip:x.log,,y.log");
        assert_eq!(spec.patterns, vec!["x.log", "y.log"]);
    }

    #[test]
    fn test_destination_protocols() {
        assert_eq!(
            OutputDestination::parse("/data/out/%03i").unwrap(),
            OutputDestination::Local("/data/out/%03i".to_string())
        );
        let remote = OutputDestination::parse("root://eos.cern.ch//eos/out").unwrap();
        assert_eq!(remote.protocol(), "root");
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let err = OutputDestination::parse("gsiftp://host/out").unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::UnsupportedProtocol { ref protocol, .. } if protocol == "gsiftp"
        ));
    }
}
