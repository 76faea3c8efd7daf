//! Workflow Generation Module
//!
//! Renders every artifact of a campaign and lays them out in the work
//! directory.
//!
//! # Structure
//!
//! - [`template`]: Template engine and escaping filters
//! - [`catalog`]: XML input catalogs for merge stages
//! - [`worker`]: Per-stage bash worker scripts
//! - [`graph`]: Node dependencies and the Makeflow text
//! - [`workdir`]: Work directory creation and input staging
//!
//! # Example
//!
//! ```rust,no_run
//! use jdl2makeflow::config::Config;
//! use jdl2makeflow::description::{load_description, StagePlan};
//! use jdl2makeflow::generate::generate;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("sim.jdl");
//!     let raw = load_description(&config.description)?;
//!     let plan = StagePlan::build(&raw)?;
//!     generate(&config, &plan)?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod graph;
pub mod template;
pub mod workdir;
pub mod worker;

use log::info;

pub use catalog::build_catalog;
pub use graph::{GraphNode, Rule, WorkflowGraph};
pub use template::TemplateEngine;
pub use worker::WorkerScript;

use crate::config::Config;
use crate::description::{Stage, StagePlan};
use crate::error::Result;

/// Name of the graph file read by the engine.
pub const MAKEFLOW_FILE: &str = "Makeflow";

/// Writes the complete work directory for `plan`.
///
/// Scripts and the graph are prepared before anything touches the disk,
/// so a rejected description leaves no work directory behind.
pub fn generate(config: &Config, plan: &StagePlan) -> Result<WorkflowGraph> {
    let engine = TemplateEngine::new();

    let scripts = plan
        .stages()
        .iter()
        .map(|job| WorkerScript::from_description(job.stage, &job.description, config.dry_run))
        .collect::<Result<Vec<_>>>()?;

    let mut catalogs = Vec::new();
    for job in plan.stages() {
        if let Some(spec) = &job.catalog {
            let xml = build_catalog(&engine, &spec.pattern, plan.job_range())?;
            catalogs.push((spec.file_name.clone(), xml));
        }
    }

    let graph = WorkflowGraph::build(plan)?;
    let makeflow = graph.render(&engine)?;

    let workdir = config.workdir.as_path();
    workdir::create_workdir(workdir, config.force)?;

    for (name, xml) in &catalogs {
        std::fs::write(workdir.join(name), xml)?;
    }
    for script in scripts.iter().filter(|s| s.stage() != Stage::Sim) {
        script.write_to(&engine, &workdir.join(script.stage().script_name()))?;
    }

    workdir::stage_inputs(workdir, &plan.all_input_files()?, &config.input_search_path())?;

    for script in scripts.iter().filter(|s| s.stage() == Stage::Sim) {
        script.write_to(&engine, &workdir.join(script.stage().script_name()))?;
    }
    std::fs::write(workdir.join(MAKEFLOW_FILE), makeflow)?;

    info!(
        "Workflow with {} nodes written to {}",
        graph.len(),
        workdir.display()
    );
    Ok(graph)
}
