//! Error Types
//!
//! Every fallible operation in the generator returns [`GeneratorError`].
//! Failures inside the generated worker scripts (empty archives, transfer
//! retries, payload exit codes) never surface here: they are handled by
//! the scripts themselves at run time.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning a job description into a workflow.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The job description text could not be parsed.
    #[error("cannot parse job description: {0}")]
    Parse(String),

    /// The job description is incomplete or has malformed fields.
    #[error("invalid job description: {0}")]
    Config(String),

    /// The work directory already exists and `--force` was not given.
    #[error("cannot create output directory \"{}\": remove existing one first", .0.display())]
    WorkDirExists(PathBuf),

    /// The work directory could not be created or wiped.
    #[error("cannot create output directory \"{}\": {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input file is missing from every searched location.
    #[error(
        "cannot copy input file \"{0}\", please make it available in the current directory \
         or remove it from the JDL"
    )]
    InputNotFound(String),

    /// The output destination uses a transfer protocol we cannot handle.
    #[error("output protocol \"{protocol}\" not supported (destination: {destination})")]
    UnsupportedProtocol {
        protocol: String,
        destination: String,
    },

    /// Rendering a script or graph template failed.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// The consistency dry run of the execution engine failed.
    #[error("cannot resume workflow: {0}")]
    Resume(String),

    /// The execution engine could not be started.
    #[error("cannot launch {program}: {source}")]
    Engine {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GeneratorError>;
