//! Job Description Module
//!
//! Provides data structures and utilities for reading, normalizing and
//! deriving job descriptions.
//!
//! # Structure
//!
//! - [`model`]: Dynamic values and the description mapping
//! - [`lexer`]: JDL tokens
//! - [`parser`]: JDL and YAML loading
//! - [`normalizer`]: Cleanup into the canonical field set
//! - [`patch`]: Set / append / delete derivation
//! - [`stages`]: Stage enumeration and per-stage descriptions
//! - [`output`]: Output entries and transfer destinations
//! - [`counter`]: Job counter placeholders

pub mod counter;
pub mod lexer;
pub mod model;
pub mod normalizer;
pub mod output;
pub mod parser;
pub mod patch;
pub mod stages;

pub use counter::{fill_counter, substitute_counter};
pub use model::{fields, JobDescription, JobRange, Value};
pub use normalizer::normalize;
pub use output::{Compression, OutputDestination, OutputSpec};
pub use parser::{load_description, parse_description, DescriptionFormat};
pub use patch::{derive, Patch, PatchOp};
pub use stages::{CatalogSpec, Stage, StageJob, StagePlan};
