//! jdl2makeflow CLI Entry Point
//!
//! Generates a Makeflow work directory from a job description and
//! optionally runs it.
//!
//! # Usage
//!
//! ```bash
//! # Generate the work directory "work"
//! jdl2makeflow sim.jdl
//!
//! # Show the summary only
//! jdl2makeflow --summary sim.jdl
//!
//! # Generate into a fresh directory and run with extra makeflow options
//! jdl2makeflow --force -w mywork --run sim.jdl -T condor -J 100
//!
//! # Resume after the per-job stage
//! jdl2makeflow --force --start-at merge sim.jdl
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use jdl2makeflow::config::{Config, DEFAULT_MAKEFLOW, DEFAULT_WORKDIR};
use jdl2makeflow::execution::{prepare_resume, Makeflow, StartStage};
use jdl2makeflow::summary::format_summary;
use jdl2makeflow::{generate, load_plan, Stage, APP_NAME, VERSION};

/// Generate a Makeflow workflow from a grid job description.
#[derive(Debug, Parser)]
#[command(name = "jdl2makeflow", version)]
struct Cli {
    /// Generate scripts that do not actually run the payload
    #[arg(short = 'n', long = "dryrun")]
    dry_run: bool,

    /// Makeflow work directory
    #[arg(short, long, default_value = DEFAULT_WORKDIR)]
    workdir: PathBuf,

    /// Print the parsed description of every stage as JSON and exit
    #[arg(short, long)]
    parse_jdl: bool,

    /// Print the configuration summary and exit
    #[arg(short, long)]
    summary: bool,

    /// Stage to start from
    #[arg(short = 't', long, value_enum, default_value_t = StartStage::Sim)]
    start_at: StartStage,

    /// Remove the work directory first if it exists
    #[arg(long)]
    force: bool,

    /// Run the workflow after generating it
    #[arg(short, long)]
    run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Execution engine binary
    #[arg(long, env = "MAKEFLOW", default_value = DEFAULT_MAKEFLOW)]
    makeflow: String,

    /// Job description (JDL, or YAML with a .yaml/.yml extension)
    jdl: PathBuf,

    /// Options passed to makeflow (put them after `--` if they clash with ours)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    makeflow_opts: Vec<String>,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let mut config = Config::new(cli.jdl);
        config.workdir = cli.workdir;
        config.dry_run = cli.dry_run;
        config.parse_only = cli.parse_jdl;
        config.summary_only = cli.summary;
        config.start_at = cli.start_at;
        config.force = cli.force;
        config.run = cli.run;
        config.verbose = cli.verbose;
        config.makeflow = cli.makeflow;
        config.makeflow_opts = cli.makeflow_opts;
        config
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Sim => "First tier of jobs",
        Stage::SpacePointCalibration => "Space Point Calibration",
        Stage::FinalQa => "Final QA",
        Stage::QaPlots => "QA Plots",
    }
}

/// Main application entry point.
fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::from(Cli::parse());
    setup_logging(config.verbose);
    info!("{} v{}", APP_NAME, VERSION);

    let plan = load_plan(&config.description)?;

    if config.parse_only {
        for (i, job) in plan.stages().iter().enumerate() {
            if i > 0 {
                println!();
            }
            println!("# {}", stage_title(job.stage));
            println!("{}", serde_json::to_string_pretty(&job.description)?);
        }
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", format_summary(&plan)?);
    if config.summary_only {
        return Ok(ExitCode::SUCCESS);
    }

    if config.dry_run {
        info!("Mode: DRY RUN (jobs will not run their payload)");
    }

    generate(&config, &plan)?;

    if !config.run {
        println!("Execute the workflow with:");
        println!("    cd {}", config.workdir.display());
        println!("    {}", config.makeflow_command());
        println!();
    }

    let engine = Makeflow::new(&config.makeflow, &config.workdir);
    prepare_resume(&config.workdir, &plan, config.start_at, &engine)?;

    if !config.run {
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = engine.run(&config.makeflow_opts)?;
    println!();
    println!("Total execution time: {:.2?}", outcome.elapsed);
    if !outcome.success() {
        error!("{} exited with code {}", config.makeflow, outcome.exit_code());
    }
    Ok(ExitCode::from(outcome.exit_code()))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_passes_trailing_makeflow_options() {
        let cli = Cli::try_parse_from([
            "jdl2makeflow",
            "--force",
            "-w",
            "mywork",
            "--run",
            "sim.jdl",
            "-T",
            "condor",
        ])
        .unwrap();
        let config = Config::from(cli);

        assert!(config.force && config.run);
        assert_eq!(config.workdir, PathBuf::from("mywork"));
        assert_eq!(config.description, PathBuf::from("sim.jdl"));
        assert_eq!(config.makeflow_opts, vec!["-T", "condor"]);
    }

    #[test]
    fn test_cli_start_at() {
        let cli = Cli::try_parse_from(["jdl2makeflow", "-t", "qaplots", "sim.jdl"]).unwrap();
        assert_eq!(cli.start_at, StartStage::Qaplots);
        assert!(Cli::try_parse_from(["jdl2makeflow", "-t", "reco", "sim.jdl"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["jdl2makeflow", "sim.jdl"]).unwrap();
        assert_eq!(cli.workdir, PathBuf::from("work"));
        assert_eq!(cli.start_at, StartStage::Sim);
        assert!(cli.makeflow_opts.is_empty());
    }

    #[test]
    fn test_cli_requires_description() {
        assert!(Cli::try_parse_from(["jdl2makeflow"]).is_err());
    }
}
