//! Workflow Execution Module
//!
//! Drives the `makeflow` engine over a generated work directory.
//!
//! # Structure
//!
//! - [`engine`]: Engine invocation and exit status mapping
//! - [`resume`]: Starting a workflow past its first stage

pub mod engine;
pub mod resume;

pub use engine::{Makeflow, RunOutcome};
pub use resume::{prepare_resume, StartStage};
