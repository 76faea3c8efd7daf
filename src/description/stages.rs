//! Pipeline Stages
//!
//! A campaign always has the per-job `sim` stage. Aggregation stages are
//! added when the base description lists them in `NextStages`:
//! - `SpacePointCalibration` adds the `spc` merge
//! - `FinalQA` adds the `finalqa` merge, followed by `qaplots`
//!
//! Each aggregation stage is a single node. Its description comes from
//! normalizing the raw description again with a stage [`Patch`], so that
//! derived values such as the environment follow the patched fields.

use std::fmt;

use log::info;

use super::model::{fields, JobDescription, JobRange, Value};
use super::normalizer::normalize;
use super::patch::Patch;
use crate::error::Result;

/// `NextStages` entry enabling the space point calibration merge.
pub const SPC_NEXT_STAGE: &str = "SpacePointCalibration";

/// `NextStages` entry enabling the final QA merge and plots.
pub const FINAL_QA_NEXT_STAGE: &str = "FinalQA";

/// One phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Sim,
    SpacePointCalibration,
    FinalQa,
    QaPlots,
}

impl Stage {
    /// Short stage name, also used for completion markers.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Sim => "sim",
            Stage::SpacePointCalibration => "spc",
            Stage::FinalQa => "finalqa",
            Stage::QaPlots => "qaplots",
        }
    }

    /// Worker script file name.
    pub fn script_name(self) -> &'static str {
        match self {
            Stage::Sim => "runjob.sh",
            Stage::SpacePointCalibration => "runspc.sh",
            Stage::FinalQa => "runfinalqa.sh",
            Stage::QaPlots => "runqaplots.sh",
        }
    }

    /// Input catalog consumed by merge stages.
    pub fn catalog_name(self) -> Option<&'static str> {
        match self {
            Stage::SpacePointCalibration => Some("spc.xml"),
            Stage::FinalQa => Some("finalqa.xml"),
            Stage::Sim | Stage::QaPlots => None,
        }
    }

    /// Whether the stage fans out into one node per job index.
    pub fn is_per_job(self) -> bool {
        self == Stage::Sim
    }

    /// Completion marker of a node. `index` only matters for `sim`.
    pub fn marker(self, index: u32) -> String {
        match self {
            Stage::Sim => format!("job{:04}.done", index),
            other => format!("{}.done", other.name()),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Catalog of upstream per-job outputs for a merge stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSpec {
    /// File name inside the work directory.
    pub file_name: String,
    /// Per-job file location, with a printf placeholder for the index.
    pub pattern: String,
}

/// A stage together with its job description.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub stage: Stage,
    pub description: JobDescription,
    pub catalog: Option<CatalogSpec>,
}

/// Every stage of a campaign, derived from one base description.
#[derive(Debug, Clone)]
pub struct StagePlan {
    range: JobRange,
    stages: Vec<StageJob>,
}

impl StagePlan {
    /// Normalizes `raw` into the `sim` stage, then builds the aggregation
    /// stages selected by its `NextStages`.
    pub fn build(raw: &JobDescription) -> Result<Self> {
        let base = normalize(raw, &Patch::new())?;
        let range = base.job_range()?;
        let output_dir = base.output_dir()?;
        let parent = parent_dir(&output_dir);

        let mut stages = Vec::new();
        for (stage, patch, catalog) in stage_patches(&base, &output_dir, parent)? {
            stages.push(StageJob {
                stage,
                description: normalize(raw, &patch)?,
                catalog,
            });
        }
        stages.insert(
            0,
            StageJob {
                stage: Stage::Sim,
                description: base,
                catalog: None,
            },
        );

        Ok(Self { range, stages })
    }

    /// Job index range of the `sim` stage.
    pub fn job_range(&self) -> JobRange {
        self.range
    }

    /// The base (`sim`) description.
    pub fn base(&self) -> &JobDescription {
        &self.stages[0].description
    }

    /// All stages, `sim` first.
    pub fn stages(&self) -> &[StageJob] {
        &self.stages
    }

    pub fn get(&self, stage: Stage) -> Option<&StageJob> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn has(&self, stage: Stage) -> bool {
        self.get(stage).is_some()
    }

    /// Distinct input files of every stage, in first-seen order.
    pub fn all_input_files(&self) -> Result<Vec<String>> {
        let mut files: Vec<String> = Vec::new();
        for job in &self.stages {
            for file in job.description.input_files()? {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }
}

/// Patches of the aggregation stages enabled in `base`, in pipeline order.
fn stage_patches(
    base: &JobDescription,
    output_dir: &str,
    parent: &str,
) -> Result<Vec<(Stage, Patch, Option<CatalogSpec>)>> {
    let mut patches = Vec::new();

    if base.has_next_stage(SPC_NEXT_STAGE)? {
        info!("Adding stage: {}", Stage::SpacePointCalibration);
        let patch = Patch::new()
            .set(
                fields::OUTPUT,
                Value::list([
                    "spcm_archive.zip:pyxsec*.root,AODQA.root,AliAOD*.root,\
                     FilterEvents_Trees*.root,*.stat*,EventStat_temp*.root,Residual*.root,\
                     TOFcalibTree.root,std*,fileinfo*.log",
                ]),
            )
            .set(
                fields::OUTPUT_DIR,
                join_path(
                    &join_path(parent, "SpacePointCalibrationMerge"),
                    base_name(output_dir),
                ),
            )
            .set(fields::EXECUTABLE, "spc_merge.sh")
            .set(fields::SPLIT_ARGUMENTS, "")
            .append(fields::INPUT_FILE, ["spc_merge.sh", "spc_merge.C", "spc.xml"])
            .delete(fields::NEXT_STAGES)
            .delete(fields::JOB_RANGE);
        let catalog = CatalogSpec {
            file_name: "spc.xml".to_string(),
            pattern: join_path(output_dir, "FilterEvents_Trees.root"),
        };
        patches.push((Stage::SpacePointCalibration, patch, Some(catalog)));
    }

    if base.has_next_stage(FINAL_QA_NEXT_STAGE)? {
        info!("Adding stages: {}, {}", Stage::FinalQa, Stage::QaPlots);
        let patch = Patch::new()
            .set(
                fields::OUTPUT,
                Value::list([
                    "QA_merge_log_archive.zip:std*,fileinfo*.log",
                    "QA_merge_archive.zip:*QAresults*.root,EventStat_temp*.root,\
                     trending*.root,event_stat*.root,*.stat*",
                ]),
            )
            .set(fields::OUTPUT_DIR, parent)
            .set(fields::EXECUTABLE, "train_merge.sh")
            .set(fields::SPLIT_ARGUMENTS, "finalqa.xml 5")
            .append(fields::INPUT_FILE, ["train_merge.sh", "finalqa.xml"])
            .delete(fields::NEXT_STAGES)
            .delete(fields::JOB_RANGE);
        let catalog = CatalogSpec {
            file_name: "finalqa.xml".to_string(),
            pattern: join_path(output_dir, "QA_archive.zip"),
        };
        patches.push((Stage::FinalQa, patch, Some(catalog)));

        let patch = Patch::new()
            .set(fields::OUTPUT, Value::list(["qa_plots/*", "std*"]))
            .set(fields::OUTPUT_DIR, join_path(parent, "QAplots"))
            .set(fields::EXECUTABLE, "qa_plots.sh")
            .set(
                fields::SPLIT_ARGUMENTS,
                join_path(parent, "QA_merge_archive.zip"),
            )
            .append(fields::INPUT_FILE, ["qa_plots.sh"])
            .delete(fields::NEXT_STAGES)
            .delete(fields::JOB_RANGE);
        patches.push((Stage::QaPlots, patch, None));
    }

    Ok(patches)
}

/// Directory part of a path or URL, like `dirname`.
fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

/// Last component of a path or URL, like `basename`.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
