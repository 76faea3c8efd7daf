//! Description Patches
//!
//! A [`Patch`] is an ordered list of [`PatchOp`]s. Applying it to a
//! description never touches the original: the base is cloned (values
//! own all their nested data, so the clone is deep) and the ops run in
//! a fixed order, sets first, appends second, deletes last, so a
//! deletion always wins over a conflicting set.

use super::model::{fields, JobDescription, Value};
use crate::error::{GeneratorError, Result};

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Replace the field's value.
    Set(String, Value),
    /// Concatenate items to a list field.
    Append(String, Vec<Value>),
    /// Remove the field.
    Delete(String),
}

/// An ordered set of patch operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Set(field.into(), value.into()));
        self
    }

    pub fn append<I, S>(mut self, field: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(|s| Value::Text(s.into())).collect();
        self.ops.push(PatchOp::Append(field.into(), items));
        self
    }

    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.ops.push(PatchOp::Delete(field.into()));
        self
    }

    /// Whether a set or append names this field.
    pub fn introduces(&self, field: &str) -> bool {
        self.ops.iter().any(|op| match op {
            PatchOp::Set(k, _) | PatchOp::Append(k, _) => k.eq_ignore_ascii_case(field),
            PatchOp::Delete(_) => false,
        })
    }

    pub(crate) fn apply_sets(&self, desc: &mut JobDescription) {
        for op in &self.ops {
            if let PatchOp::Set(field, value) = op {
                desc.insert(field.clone(), value.clone());
            }
        }
    }

    pub(crate) fn apply_appends(&self, desc: &mut JobDescription) -> Result<()> {
        for op in &self.ops {
            let PatchOp::Append(field, items) = op else {
                continue;
            };
            let combined = match desc.get(field) {
                None => items.clone(),
                Some(Value::List(existing)) => {
                    let mut combined = existing.clone();
                    combined.extend(items.iter().cloned());
                    combined
                }
                Some(other) => {
                    return Err(GeneratorError::Config(format!(
                        "cannot append to field {}: it is {}, not a list",
                        field,
                        other.kind()
                    )));
                }
            };
            desc.insert(field.clone(), Value::List(combined));
        }
        Ok(())
    }

    pub(crate) fn apply_deletes(&self, desc: &mut JobDescription) {
        for op in &self.ops {
            if let PatchOp::Delete(field) = op {
                desc.remove(field);
            }
        }
    }

    /// Drops every field outside the whitelist that this patch did not
    /// introduce.
    pub(crate) fn prune(&self, desc: &mut JobDescription) {
        desc.retain(|key| {
            fields::WHITELIST
                .iter()
                .any(|w| w.eq_ignore_ascii_case(key))
                || self.introduces(key)
        });
    }
}

/// Derives a new description from `base`.
///
/// `base` is left untouched; the result shares no data with it.
pub fn derive(base: &JobDescription, patch: &Patch) -> Result<JobDescription> {
    let mut derived = base.clone();
    patch.apply_sets(&mut derived);
    patch.apply_appends(&mut derived)?;
    patch.apply_deletes(&mut derived);
    patch.prune(&mut derived);
    Ok(derived)
}
