//! Configuration Summary
//!
//! Human readable overview of a campaign, printed before anything is
//! written to disk.

use colored::Colorize;

use crate::description::{Stage, StagePlan};
use crate::error::Result;

fn heading(out: &mut String, title: &str) {
    out.push_str(&format!("{}\n", title.green().bold()));
}

fn bullets(out: &mut String, items: impl IntoIterator<Item = String>) {
    let mut empty = true;
    for item in items {
        out.push_str(&format!(" * {}\n", item));
        empty = false;
    }
    if empty {
        out.push_str(" (none)\n");
    }
}

/// Formats the summary of the base description and its stages.
pub fn format_summary(plan: &StagePlan) -> Result<String> {
    let base = plan.base();
    let range = plan.job_range();
    let mut out = format!(
        "{}\n\n",
        "Running the workflow with the following configuration:".bold()
    );

    heading(&mut out, "Packages:");
    bullets(&mut out, base.packages()?);

    out.push_str(&format!(
        "\n{} total jobs, with job IDs from {} to {} (included), will execute the command:\n",
        range.len().to_string().cyan().bold(),
        range.first,
        range.last
    ));
    out.push_str(&format!("{} {}\n\n", base.executable()?, base.split_arguments()?));

    heading(
        &mut out,
        "Input files (must be in the current directory, will be made available to each job):",
    );
    bullets(&mut out, base.input_files()?);

    out.push('\n');
    heading(&mut out, "Output files (archives with content listed):");
    bullets(
        &mut out,
        base.outputs()?.into_iter().map(|o| match o.archive {
            Some(archive) => format!("{} ==> {}", archive, o.patterns.join(",")),
            None => o.patterns.join(","),
        }),
    );

    out.push('\n');
    heading(&mut out, "Environment variables available to the jobs:");
    bullets(
        &mut out,
        base.environment()?
            .into_iter()
            .map(|(name, value)| format!("{} ==> {}", name, value)),
    );

    let extra: Vec<Stage> = plan.stages().iter().map(|s| s.stage).filter(|s| *s != Stage::Sim).collect();
    if !extra.is_empty() {
        out.push('\n');
        heading(&mut out, "Stages after the jobs:");
        bullets(&mut out, extra.iter().map(|s| s.to_string()));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{fields, JobDescription, Value};

    fn plan() -> StagePlan {
        let mut desc = JobDescription::new();
        desc.insert(fields::EXECUTABLE, Value::from("aliroot_dpgsim.sh"));
        desc.insert(fields::SPLIT_ARGUMENTS, Value::from("--run 244918 --uid %i"));
        desc.insert(fields::PACKAGES, Value::list(["VO_ALICE@AliDPG::v5"]));
        desc.insert(fields::SPLIT, Value::from("production:10-19"));
        desc.insert(fields::OUTPUT, Value::list(["log_archive.zip:std*,*.log", "qa_plots/*"]));
        desc.insert(fields::OUTPUT_DIR, Value::from("/data/out/%03i"));
        desc.insert(fields::INPUT_FILE, Value::list(["sim.C"]));
        desc.insert(fields::NEXT_STAGES, Value::list(["SpacePointCalibration"]));
        desc.insert(fields::JDL_VARIABLES, Value::list(["LPMRunNumber"]));
        desc.insert("LPMRunNumber", Value::from("244918"));
        StagePlan::build(&desc).unwrap()
    }

    #[test]
    fn test_summary_content() {
        colored::control::set_override(false);
        let text = format_summary(&plan()).unwrap();

        assert!(text.contains(" * VO_ALICE@AliDPG::v5\n"));
        assert!(text.contains("10 total jobs, with job IDs from 10 to 19 (included)"));
        assert!(text.contains("aliroot_dpgsim.sh --run 244918 --uid %i\n"));
        assert!(text.contains(" * log_archive.zip ==> std*,*.log\n"));
        assert!(text.contains(" * qa_plots/*\n"));
        assert!(text.contains(" * ALIEN_JDL_LPMRUNNUMBER ==> 244918\n"));
        assert!(text.contains(" * spc\n"));
    }

    #[test]
    fn test_summary_layout_with_empty_sections() {
        colored::control::set_override(false);
        let mut desc = JobDescription::new();
        desc.insert(fields::EXECUTABLE, Value::from("run.sh"));
        desc.insert(fields::SPLIT, Value::from("production:1-1"));
        desc.insert(fields::OUTPUT_DIR, Value::from("/data/out"));
        let text = format_summary(&StagePlan::build(&desc).unwrap()).unwrap();

        pretty_assertions::assert_eq!(
            text,
            "Running the workflow with the following configuration:\n\n\
             Packages:\n (none)\n\n\
             1 total jobs, with job IDs from 1 to 1 (included), will execute the command:\n\
             run.sh \n\n\
             Input files (must be in the current directory, will be made available to each job):\n (none)\n\n\
             Output files (archives with content listed):\n (none)\n\n\
             Environment variables available to the jobs:\n (none)\n"
        );
    }
}
