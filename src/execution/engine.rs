//! Makeflow Driver
//!
//! Launches the `makeflow` execution engine inside the work directory,
//! either as a consistency dry run or for the real workflow run.

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::error::{GeneratorError, Result};

/// Exit status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Process exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Terminating signal on Unix.
    pub signal: Option<i32>,
    pub elapsed: Duration,
}

impl RunOutcome {
    fn from_status(status: ExitStatus, elapsed: Duration) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            elapsed,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code to propagate to our caller.
    ///
    /// Positive codes pass through, signals become `128 + n` and any
    /// other non-positive code `c` becomes `128 - c`.
    pub fn exit_code(&self) -> u8 {
        let code = match (self.code, self.signal) {
            (Some(0), _) => 0,
            (Some(c), _) if c > 0 => c,
            (Some(c), _) => 128 - c,
            (None, Some(n)) => 128 + n,
            (None, None) => 1,
        };
        u8::try_from(code).unwrap_or(u8::MAX)
    }
}

/// The execution engine bound to a work directory.
#[derive(Debug, Clone)]
pub struct Makeflow {
    program: String,
    workdir: PathBuf,
}

impl Makeflow {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.workdir);
        cmd
    }

    fn launch_error(&self, source: std::io::Error) -> GeneratorError {
        GeneratorError::Engine {
            program: self.program.clone(),
            source,
        }
    }

    /// Runs `makeflow -T dryrun` with its output discarded.
    ///
    /// Marks every rule whose target already exists as done in the
    /// engine's log, which is how earlier stages are skipped.
    pub fn dry_run_check(&self) -> Result<()> {
        debug!("Running {} -T dryrun in {}", self.program, self.workdir.display());
        let status = self
            .command()
            .args(["-T", "dryrun"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| self.launch_error(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(GeneratorError::Resume(format!(
                "{} -T dryrun failed in {} ({})",
                self.program,
                self.workdir.display(),
                status
            )))
        }
    }

    /// Runs the workflow with `opts`, inheriting our standard streams.
    pub fn run(&self, opts: &[String]) -> Result<RunOutcome> {
        info!("Running {} {}", self.program, opts.join(" "));
        let start_time = Instant::now();
        let status = self
            .command()
            .args(opts)
            .status()
            .map_err(|e| self.launch_error(e))?;

        let outcome = RunOutcome::from_status(status, start_time.elapsed());
        if outcome.success() {
            info!("Workflow completed in {:.2?}", outcome.elapsed);
        } else {
            error!(
                "Workflow failed after {:.2?} ({})",
                outcome.elapsed, status
            );
        }
        Ok(outcome)
    }
}
