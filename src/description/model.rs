//! Job Description Data Model
//!
//! A job description is a mapping from attribute name to a dynamically
//! typed [`Value`]. The same type holds the raw parser output and the
//! normalized, per-stage descriptions; typed accessors read the
//! canonical fields.
//!
//! # Example JDL
//!
//! ```text
//! Executable = "/alice/cern.ch/user/a/aliprod/bin/aliroot_dpgsim.sh";
//! Split = "production:1-100";
//! SplitArguments = "--run 244918 --event #alien_counter#";
//! Packages = { "VO_ALICE@AliDPG::v5-09-XX-26", "VO_ALICE@jemalloc::v3.6.0" };
//! OutputDir = "/alice/sim/2018/LHC18a1/244918/#alien_counter_03i#";
//! NextStages = { "FinalQA" };
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use super::output::OutputSpec;
use crate::error::{GeneratorError, Result};

/// Canonical attribute names.
pub mod fields {
    pub const EXECUTABLE: &str = "Executable";
    pub const SPLIT: &str = "Split";
    pub const SPLIT_ARGUMENTS: &str = "SplitArguments";
    pub const PACKAGES: &str = "Packages";
    pub const JOB_RANGE: &str = "JobRange";
    pub const OUTPUT: &str = "Output";
    pub const INPUT_FILE: &str = "InputFile";
    pub const ENVIRONMENT: &str = "Environment";
    pub const NEXT_STAGES: &str = "NextStages";
    pub const OUTPUT_DIR: &str = "OutputDir";
    pub const SOURCE_ENV_SCRIPT: &str = "SourceEnvScript";
    pub const JDL_VARIABLES: &str = "JDLVariables";
    pub const EXTRA_VARIABLES: &str = "ExtraVariables";

    /// Fields kept after normalization.
    pub const WHITELIST: &[&str] = &[
        SPLIT_ARGUMENTS,
        EXECUTABLE,
        PACKAGES,
        JOB_RANGE,
        OUTPUT,
        INPUT_FILE,
        ENVIRONMENT,
        NEXT_STAGES,
        OUTPUT_DIR,
        SOURCE_ENV_SCRIPT,
    ];

    /// Every attribute the normalizer knows by name.
    pub const KNOWN: &[&str] = &[
        SPLIT_ARGUMENTS,
        EXECUTABLE,
        PACKAGES,
        JOB_RANGE,
        OUTPUT,
        INPUT_FILE,
        ENVIRONMENT,
        NEXT_STAGES,
        OUTPUT_DIR,
        SOURCE_ENV_SCRIPT,
        SPLIT,
        JDL_VARIABLES,
        EXTRA_VARIABLES,
    ];
}

/// A dynamically typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a list of text values.
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::Text(s.into())).collect())
    }

    /// Returns the list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the nested mapping, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Renders a scalar as a string. Lists are joined with commas.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Integer(n) => Some(n.to_string()),
            Value::List(items) => {
                let parts: Option<Vec<String>> = items.iter().map(Value::to_text).collect();
                parts.map(|p| p.join(","))
            }
            Value::Map(_) => None,
        }
    }

    /// Interprets the value as a list of strings. A scalar counts as a
    /// one-element list.
    pub fn to_text_list(&self) -> Option<Vec<String>> {
        match self {
            Value::List(items) => items.iter().map(Value::to_text).collect(),
            Value::Text(_) | Value::Integer(_) => self.to_text().map(|s| vec![s]),
            Value::Map(_) => None,
        }
    }

    /// Short type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::List(_) => "list",
            Value::Map(_) => "mapping",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

/// Inclusive range of job indices, `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRange {
    pub first: u32,
    pub last: u32,
}

impl JobRange {
    /// Creates a range; fails when `first > last`.
    pub fn new(first: u32, last: u32) -> Result<Self> {
        if first > last {
            return Err(GeneratorError::Config(format!(
                "job range start {} is greater than its end {}",
                first, last
            )));
        }
        Ok(Self { first, last })
    }

    /// Number of jobs in the range.
    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }

    pub fn to_value(self) -> Value {
        Value::List(vec![
            Value::Integer(i64::from(self.first)),
            Value::Integer(i64::from(self.last)),
        ])
    }
}

/// A job description: attribute name to value.
///
/// Lookups try the exact name first and fall back to an ASCII
/// case-insensitive match, since JDL attribute names are not case
/// sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct JobDescription {
    fields: BTreeMap<String, Value>,
}

impl JobDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored key matching `name`.
    fn resolve_key(&self, name: &str) -> Option<&String> {
        if let Some((key, _)) = self.fields.get_key_value(name) {
            return Some(key);
        }
        self.fields.keys().find(|k| k.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.resolve_key(name).and_then(|k| self.fields.get(k))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve_key(name).is_some()
    }

    /// Inserts a value, replacing any entry whose name matches
    /// case-insensitively.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(existing) = self.resolve_key(&name).cloned() {
            if existing != name {
                self.fields.remove(&existing);
            }
        }
        self.fields.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let key = self.resolve_key(name)?.clone();
        self.fields.remove(&key)
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.fields.retain(|k, _| keep(k));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reads a text field that must be present.
    pub fn require_text(&self, name: &str) -> Result<String> {
        let value = self
            .get(name)
            .ok_or_else(|| GeneratorError::Config(format!("missing mandatory field {}", name)))?;
        match value {
            Value::Text(_) | Value::Integer(_) | Value::List(_) => value
                .to_text()
                .ok_or_else(|| type_error(name, "text", value)),
            Value::Map(_) => Err(type_error(name, "text", value)),
        }
    }

    /// Reads an optional text field.
    pub fn text(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_text()
                .map(Some)
                .ok_or_else(|| type_error(name, "text", value)),
        }
    }

    /// Reads an optional list-of-strings field; absent means empty.
    pub fn text_list(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(value) => value
                .to_text_list()
                .ok_or_else(|| type_error(name, "list", value)),
        }
    }

    pub fn executable(&self) -> Result<String> {
        self.require_text(fields::EXECUTABLE)
    }

    pub fn split_arguments(&self) -> Result<String> {
        Ok(self.text(fields::SPLIT_ARGUMENTS)?.unwrap_or_default())
    }

    pub fn packages(&self) -> Result<Vec<String>> {
        self.text_list(fields::PACKAGES)
    }

    pub fn input_files(&self) -> Result<Vec<String>> {
        self.text_list(fields::INPUT_FILE)
    }

    pub fn next_stages(&self) -> Result<Vec<String>> {
        self.text_list(fields::NEXT_STAGES)
    }

    pub fn output_dir(&self) -> Result<String> {
        self.require_text(fields::OUTPUT_DIR)
    }

    /// Returns the environment script, treating an empty string as unset.
    pub fn source_env_script(&self) -> Result<Option<String>> {
        Ok(self
            .text(fields::SOURCE_ENV_SCRIPT)?
            .filter(|s| !s.trim().is_empty()))
    }

    /// Parsed output entries.
    pub fn outputs(&self) -> Result<Vec<OutputSpec>> {
        Ok(self
            .text_list(fields::OUTPUT)?
            .iter()
            .map(|entry| OutputSpec::parse(entry))
            .collect())
    }

    /// Exported environment, variable name to value.
    pub fn environment(&self) -> Result<BTreeMap<String, String>> {
        let Some(value) = self.get(fields::ENVIRONMENT) else {
            return Ok(BTreeMap::new());
        };
        let map = value
            .as_map()
            .ok_or_else(|| type_error(fields::ENVIRONMENT, "mapping", value))?;
        map.iter()
            .map(|(k, v)| {
                v.to_text()
                    .map(|s| (k.clone(), s))
                    .ok_or_else(|| type_error(k, "text", v))
            })
            .collect()
    }

    /// The normalized job range, stored as a two-integer list.
    pub fn job_range(&self) -> Result<JobRange> {
        let value = self.get(fields::JOB_RANGE).ok_or_else(|| {
            GeneratorError::Config(format!("missing mandatory field {}", fields::JOB_RANGE))
        })?;
        match value.as_list() {
            Some([Value::Integer(a), Value::Integer(b)]) => {
                let a = u32::try_from(*a).map_err(|_| range_error(value))?;
                let b = u32::try_from(*b).map_err(|_| range_error(value))?;
                JobRange::new(a, b)
            }
            _ => Err(range_error(value)),
        }
    }

    /// Whether `stage` is listed in `NextStages`.
    pub fn has_next_stage(&self, stage: &str) -> Result<bool> {
        Ok(self.next_stages()?.iter().any(|s| s == stage))
    }
}

fn type_error(name: &str, expected: &str, found: &Value) -> GeneratorError {
    GeneratorError::Config(format!(
        "field {} must be {}, found {}",
        name,
        expected,
        found.kind()
    ))
}

fn range_error(found: &Value) -> GeneratorError {
    GeneratorError::Config(format!(
        "field {} must be a pair of non-negative integers, found {:?}",
        fields::JOB_RANGE,
        found
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut desc = JobDescription::new();
        desc.insert("executable", Value::from("aliroot"));

        assert!(desc.contains("Executable"));
        assert_eq!(desc.executable().unwrap(), "aliroot");
    }

    #[test]
    fn test_insert_replaces_differently_cased_key() {
        let mut desc = JobDescription::new();
        desc.insert("outputdir", Value::from("/a"));
        desc.insert("OutputDir", Value::from("/b"));

        assert_eq!(desc.len(), 1);
        assert_eq!(desc.output_dir().unwrap(), "/b");
        assert_eq!(desc.keys().collect::<Vec<_>>(), vec!["OutputDir"]);
    }

    #[test]
    fn test_missing_mandatory_field() {
        let desc = JobDescription::new();
        let err = desc.executable().unwrap_err();
        assert!(err.to_string().contains("missing mandatory field Executable"));
    }

    #[test]
    fn test_scalar_reads_as_single_item_list() {
        let mut desc = JobDescription::new();
        desc.insert(fields::PACKAGES, Value::from("VO_ALICE@AliDPG::v1"));
        assert_eq!(desc.packages().unwrap(), vec!["VO_ALICE@AliDPG::v1"]);
    }

    #[test]
    fn test_list_type_mismatch() {
        let mut desc = JobDescription::new();
        desc.insert(fields::NEXT_STAGES, Value::Map(BTreeMap::new()));
        assert!(desc.next_stages().is_err());
    }

    #[test]
    fn test_job_range_roundtrip_through_value() {
        let mut desc = JobDescription::new();
        desc.insert(fields::JOB_RANGE, JobRange::new(3, 7).unwrap().to_value());

        let range = desc.job_range().unwrap();
        assert_eq!(range, JobRange { first: 3, last: 7 });
        assert_eq!(range.len(), 5);
        assert_eq!(range.indices().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_job_range_rejects_inverted_bounds() {
        assert!(JobRange::new(8, 2).is_err());
    }

    #[test]
    fn test_empty_source_env_script_is_unset() {
        let mut desc = JobDescription::new();
        desc.insert(fields::SOURCE_ENV_SCRIPT, Value::from(""));
        assert_eq!(desc.source_env_script().unwrap(), None);
    }

    #[test]
    fn test_value_serializes_untagged() {
        let value = Value::List(vec![Value::from("a"), Value::Integer(2)]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["a",2]"#);
    }
}
