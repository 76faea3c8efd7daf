//! Input Catalogs
//!
//! Merge stages read the per-job outputs of `sim` through an AliEn XML
//! collection listing one file per job index.

use serde::Serialize;

use super::template::TemplateEngine;
use crate::description::{fill_counter, substitute_counter, JobRange};
use crate::error::Result;

const CATALOG_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<alien>
  <collection name="alien_collection.xml">
{% for event in events %}
    <event name="{{ event.index }}">
      <file turl="{{ event.turl | xml }}" type="f"/>
    </event>
{% endfor %}
  </collection>
</alien>
"#;

#[derive(Serialize)]
struct CatalogEvent {
    index: u32,
    turl: String,
}

#[derive(Serialize)]
struct CatalogModel {
    events: Vec<CatalogEvent>,
}

/// Renders the collection for every index of `range`.
///
/// `pattern` may hold counter markers or printf placeholders; each event
/// gets the pattern with its own index filled in.
pub fn build_catalog(engine: &TemplateEngine, pattern: &str, range: JobRange) -> Result<String> {
    let format = substitute_counter(pattern);
    let events = range
        .indices()
        .map(|index| CatalogEvent {
            index,
            turl: fill_counter(&format, index),
        })
        .collect();
    engine.render(CATALOG_TEMPLATE, CatalogModel { events })
}
