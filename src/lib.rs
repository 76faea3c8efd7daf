//! jdl2makeflow - Job Description to Makeflow Generator
//!
//! Turns a grid job description (JDL or YAML) for a Monte Carlo
//! production into a Makeflow work directory: one worker script per
//! stage, XML input catalogs for the merge stages and the dependency
//! graph run by the `makeflow` engine.
//!
//! # Architecture
//!
//! - [`description`]: Parsing, normalization and per-stage derivation
//! - [`generate`]: Worker scripts, catalogs, graph and work directory
//! - [`execution`]: Engine invocation and resuming past the first stage
//! - [`config`]: Run configuration
//! - [`summary`]: Human readable campaign overview
//!
//! # Example
//!
//! ```rust,no_run
//! use jdl2makeflow::config::Config;
//! use jdl2makeflow::execution::Makeflow;
//! use jdl2makeflow::{generate, load_plan};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("sim.jdl");
//!     let plan = load_plan(&config.description)?;
//!
//!     generate(&config, &plan)?;
//!
//!     let outcome = Makeflow::new("makeflow", &config.workdir).run(&[])?;
//!     println!("exit code {}", outcome.exit_code());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod description;
pub mod error;
pub mod execution;
pub mod generate;
pub mod summary;

use std::path::Path;

use log::info;

pub use config::Config;
pub use description::{JobDescription, Stage, StagePlan};
pub use error::{GeneratorError, Result};
pub use generate::generate;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "jdl2makeflow";

/// Loads a job description and derives every stage from it.
pub fn load_plan(path: impl AsRef<Path>) -> Result<StagePlan> {
    let path = path.as_ref();
    info!("Loading job description: {}", path.display());
    let raw = description::load_description(path)?;
    StagePlan::build(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "jdl2makeflow");
    }

    #[test]
    fn test_load_plan_from_jdl() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sim.jdl");
        fs::write(
            &path,
            r#"
Executable = "/alice/bin/aliroot_dpgsim.sh";
Split = "production:1-10";
SplitArguments = "--run 244918 --uid #alien_counter#";
Packages = { "VO_ALICE@AliDPG::v5", "VO_ALICE@jemalloc::v3" };
OutputDir = "/data/LHC18a1/#alien_counter_03i#";
NextStages = { "FinalQA" };
"#,
        )
        .unwrap();

        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.job_range().len(), 10);
        assert!(plan.has(Stage::FinalQa));
        assert!(plan.has(Stage::QaPlots));
        assert!(!plan.has(Stage::SpacePointCalibration));
        assert_eq!(plan.base().packages().unwrap(), vec!["VO_ALICE@AliDPG::v5"]);
        assert_eq!(plan.base().output_dir().unwrap(), "/data/LHC18a1/%03i");
    }

    #[test]
    fn test_load_plan_missing_file() {
        assert!(load_plan("/nonexistent/sim.jdl").is_err());
    }
}
