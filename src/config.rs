//! Run Configuration
//!
//! A single [`Config`] is built from the command line once and passed by
//! reference to every phase of the generator.

use std::env;
use std::path::PathBuf;

use log::debug;
use once_cell::sync::Lazy;

use crate::execution::StartStage;

/// Default Makeflow work directory.
pub const DEFAULT_WORKDIR: &str = "work";

/// Default execution engine binary.
pub const DEFAULT_MAKEFLOW: &str = "makeflow";

/// Directory holding this executable, searched for input files missing
/// from the invocation directory.
pub static INSTALL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    debug!("Install directory: {}", dir.display());
    dir
});

#[derive(Debug, Clone)]
pub struct Config {
    /// Job description file.
    pub description: PathBuf,
    pub workdir: PathBuf,
    /// Generate scripts that skip the payload.
    pub dry_run: bool,
    /// Print the stage descriptions and stop.
    pub parse_only: bool,
    /// Print the configuration summary and stop.
    pub summary_only: bool,
    pub start_at: StartStage,
    /// Wipe an existing work directory.
    pub force: bool,
    /// Launch the engine once the work directory is ready.
    pub run: bool,
    pub verbose: bool,
    pub makeflow: String,
    /// Extra options forwarded to the engine.
    pub makeflow_opts: Vec<String>,
    pub install_dir: PathBuf,
}

impl Config {
    /// Configuration with defaults for everything but the description.
    pub fn new(description: impl Into<PathBuf>) -> Self {
        Self {
            description: description.into(),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            dry_run: false,
            parse_only: false,
            summary_only: false,
            start_at: StartStage::default(),
            force: false,
            run: false,
            verbose: false,
            makeflow: DEFAULT_MAKEFLOW.to_string(),
            makeflow_opts: Vec::new(),
            install_dir: INSTALL_DIR.clone(),
        }
    }

    /// Directories searched for input files: invocation directory first,
    /// then the install directory.
    pub fn input_search_path(&self) -> Vec<PathBuf> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        vec![cwd, self.install_dir.clone()]
    }

    /// Command suggested to the user for running the workflow.
    pub fn makeflow_command(&self) -> String {
        let mut parts = vec![self.makeflow.as_str()];
        parts.extend(self.makeflow_opts.iter().map(String::as_str));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("sim.jdl");
        assert_eq!(config.workdir, PathBuf::from("work"));
        assert_eq!(config.start_at, StartStage::Sim);
        assert_eq!(config.makeflow, "makeflow");
        assert!(!config.run && !config.force && !config.dry_run);
    }

    #[test]
    fn test_input_search_path_order() {
        let mut config = Config::new("sim.jdl");
        config.install_dir = PathBuf::from("/opt/jdl2makeflow");
        let path = config.input_search_path();
        assert_eq!(path.len(), 2);
        assert_eq!(path[1], PathBuf::from("/opt/jdl2makeflow"));
    }

    #[test]
    fn test_makeflow_command() {
        let mut config = Config::new("sim.jdl");
        assert_eq!(config.makeflow_command(), "makeflow");
        config.makeflow_opts = vec!["-T".to_string(), "condor".to_string()];
        assert_eq!(config.makeflow_command(), "makeflow -T condor");
    }

    #[test]
    fn test_install_dir_resolves() {
        assert!(!INSTALL_DIR.as_os_str().is_empty());
    }
}
