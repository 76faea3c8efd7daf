//! Resuming a Workflow
//!
//! Starting past `sim` is done by creating the completion markers of the
//! skipped nodes and letting the engine record them through a dry run,
//! before any real run.

use std::fs::File;
use std::path::Path;

use clap::ValueEnum;
use log::{info, warn};

use super::engine::Makeflow;
use crate::description::{Stage, StagePlan};
use crate::error::Result;

/// Stage the workflow starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StartStage {
    #[default]
    Sim,
    /// Skip the per-job stage.
    Merge,
    /// Skip the per-job stage and the merges.
    Qaplots,
}

/// Markers that stand in for the stages skipped by `start`.
pub fn resume_markers(plan: &StagePlan, start: StartStage) -> Vec<String> {
    let mut markers = Vec::new();
    if matches!(start, StartStage::Merge | StartStage::Qaplots) {
        markers.extend(plan.job_range().indices().map(|i| Stage::Sim.marker(i)));
    }
    if start == StartStage::Qaplots {
        markers.push(Stage::FinalQa.marker(0));
        markers.push(Stage::SpacePointCalibration.marker(0));
    }
    markers
}

/// Prepares `workdir` to start at `start`.
///
/// Touches the markers of the skipped stages, then runs the engine's dry
/// run so it records them as done. Nothing happens when starting at
/// `sim`. Returns the markers created.
pub fn prepare_resume(
    workdir: &Path,
    plan: &StagePlan,
    start: StartStage,
    engine: &Makeflow,
) -> Result<Vec<String>> {
    if start == StartStage::Sim {
        return Ok(Vec::new());
    }
    if start == StartStage::Qaplots && !plan.has(Stage::QaPlots) {
        warn!("Starting at qaplots, but the workflow has no QA stages");
    }

    let markers = resume_markers(plan, start);
    for marker in &markers {
        File::create(workdir.join(marker))?;
    }
    info!("Created {} completion markers", markers.len());

    engine.dry_run_check()?;
    info!("Workflow will start at {:?}", start);
    Ok(markers)
}
