//! Description Normalizer
//!
//! Turns a raw parsed description into the canonical form consumed by
//! the generators:
//! - counter markers rewritten into printf placeholders
//! - allocator override packages dropped
//! - `Split` parsed into `JobRange`
//! - `@` storage hints stripped from `Output`
//! - `InputFile` reduced to basenames
//! - `Environment` assembled from `JDLVariables` and `ExtraVariables`
//! - everything outside the field whitelist removed

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::counter::{substitute_counter, substitute_counter_value};
use super::model::{fields, JobDescription, JobRange, Value};
use super::output::strip_storage_hint;
use super::patch::Patch;
use crate::error::{GeneratorError, Result};

/// Packages containing this are never loaded.
const EXCLUDED_PACKAGE: &str = "jemalloc";

/// Prefix of variables exported from `JDLVariables`.
const JDL_VARIABLE_PREFIX: &str = "ALIEN_JDL_";

/// `<mode>:<first>-<last>`, e.g. `production:1-1000`.
static SPLIT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[^:\s]+\s*:\s*([0-9]+)\s*-\s*([0-9]+)\s*$").expect("valid split regex")
});

/// Normalizes a raw description, applying `patch` before pruning.
///
/// Sets are applied before any cleanup, so overridden fields are
/// normalized like original ones; appends are applied after the cleanup
/// and before the environment is assembled; deletes run last.
pub fn normalize(raw: &JobDescription, patch: &Patch) -> Result<JobDescription> {
    let mut desc = canonicalize(raw);
    patch.apply_sets(&mut desc);

    desc.executable()?;

    let args = match desc.get(fields::SPLIT_ARGUMENTS) {
        Some(value) => substitute_counter_value(value).ok_or_else(|| {
            GeneratorError::Config(format!("field {} must be text", fields::SPLIT_ARGUMENTS))
        })?,
        None => String::new(),
    };
    desc.insert(fields::SPLIT_ARGUMENTS, Value::Text(args));

    let output_dir = substitute_counter(&desc.output_dir()?);
    desc.insert(fields::OUTPUT_DIR, Value::Text(output_dir));

    let packages: Vec<String> = desc
        .packages()?
        .into_iter()
        .filter(|p| {
            let keep = !p.contains(EXCLUDED_PACKAGE);
            if !keep {
                debug!("Dropping package {}", p);
            }
            keep
        })
        .collect();
    desc.insert(fields::PACKAGES, Value::list(packages));

    let range = parse_split(&desc.require_text(fields::SPLIT)?)?;
    desc.insert(fields::JOB_RANGE, range.to_value());

    let outputs: Vec<String> = desc
        .text_list(fields::OUTPUT)?
        .iter()
        .map(|o| strip_storage_hint(o).to_string())
        .collect();
    desc.insert(fields::OUTPUT, Value::list(outputs));

    let mut inputs: Vec<String> = desc
        .input_files()?
        .iter()
        .map(|f| basename(f))
        .collect();
    if let Some(script) = desc.source_env_script()? {
        inputs.push(basename(&script));
    }
    desc.insert(fields::INPUT_FILE, Value::list(inputs));

    patch.apply_appends(&mut desc)?;

    let environment = build_environment(&desc)?;
    desc.insert(fields::ENVIRONMENT, Value::Map(environment));

    patch.apply_deletes(&mut desc);
    patch.prune(&mut desc);
    Ok(desc)
}

/// Parses a `Split` attribute into an inclusive job range.
pub fn parse_split(split: &str) -> Result<JobRange> {
    let caps = SPLIT_RANGE.captures(split).ok_or_else(|| {
        GeneratorError::Config(format!(
            "cannot find a job range in {} = \"{}\" (expected <mode>:<first>-<last>)",
            fields::SPLIT,
            split
        ))
    })?;
    let bound = |i: usize| -> Result<u32> {
        caps[i].parse().map_err(|_| {
            GeneratorError::Config(format!("job range bound \"{}\" out of range", &caps[i]))
        })
    };
    JobRange::new(bound(1)?, bound(2)?)
}

/// Renames known attributes to their canonical spelling.
fn canonicalize(raw: &JobDescription) -> JobDescription {
    let mut desc = JobDescription::new();
    for (key, value) in raw.iter() {
        let name = fields::KNOWN
            .iter()
            .find(|k| k.eq_ignore_ascii_case(key))
            .map_or_else(|| key.to_string(), |k| k.to_string());
        desc.insert(name, value.clone());
    }
    desc
}

/// Exported variables: `JDLVariables` as `ALIEN_JDL_<NAME>`, and
/// `ExtraVariables` under their own name.
fn build_environment(desc: &JobDescription) -> Result<BTreeMap<String, Value>> {
    let mut environment = BTreeMap::new();
    for name in desc.text_list(fields::JDL_VARIABLES)? {
        let key = format!("{}{}", JDL_VARIABLE_PREFIX, name.to_uppercase());
        environment.insert(key, Value::Text(variable_value(desc, &name)?));
    }
    for name in desc.text_list(fields::EXTRA_VARIABLES)? {
        environment.insert(name.clone(), Value::Text(variable_value(desc, &name)?));
    }
    Ok(environment)
}

fn variable_value(desc: &JobDescription, name: &str) -> Result<String> {
    match desc.get(name) {
        None => Ok(String::new()),
        Some(value) => substitute_counter_value(value).ok_or_else(|| {
            GeneratorError::Config(format!("variable {} cannot be exported: it is a mapping", name))
        }),
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}
