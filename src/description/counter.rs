//! Job Counter Placeholders
//!
//! JDL values refer to the per-job index with `#alien_counter#` or
//! `#alien_counter_FMT#` (e.g. `#alien_counter_03i#`). These markers are
//! rewritten into printf placeholders (`%i`, `%03i`) so that the worker
//! script can inject the job index at run time with `printf`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::model::Value;

const BARE_COUNTER: &str = "#alien_counter#";

static COUNTER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#alien_counter_([^#]+)#").expect("valid counter regex"));

static PRINTF_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%(?:(%)|(?P<flags>[-0]*)(?P<width>\d*)(?P<conv>[diu]))")
        .expect("valid placeholder regex")
});

/// Rewrites counter markers into printf placeholders.
pub fn substitute_counter(text: &str) -> String {
    let text = text.replace(BARE_COUNTER, "#alien_counter_i#");
    COUNTER_MARKER.replace_all(&text, "%$1").into_owned()
}

/// Counter substitution on a value; lists are joined with commas first.
pub fn substitute_counter_value(value: &Value) -> Option<String> {
    value.to_text().map(|s| substitute_counter(&s))
}

/// Fills printf integer placeholders with `index`, the way
/// `printf "$FORMAT" "$JOBID"` does in the worker script: the first
/// placeholder takes the index, later ones take 0, `%%` is a literal.
pub fn fill_counter(format: &str, index: u32) -> String {
    let mut consumed = false;
    PRINTF_PLACEHOLDER
        .replace_all(format, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "%".to_string();
            }
            let value = if consumed { 0 } else { index };
            consumed = true;

            let flags = caps.name("flags").map_or("", |m| m.as_str());
            let width: usize = caps
                .name("width")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);

            if flags.contains('-') {
                format!("{:<width$}", value, width = width)
            } else if flags.contains('0') {
                format!("{:0width$}", value, width = width)
            } else {
                format!("{:>width$}", value, width = width)
            }
        })
        .into_owned()
}
