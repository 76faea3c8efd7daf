//! Workflow Graph Builder
//!
//! Turns a [`StagePlan`] into the Makeflow consumed by the execution
//! engine. Every node is identified by its completion marker:
//!
//! - `jobNNNN.done`: one `sim` node per job index, no predecessors
//! - `spc.done`, `finalqa.done`: depend on every `sim` node
//! - `qaplots.done`: depends on `finalqa.done`
//!
//! Each rule lists the worker script, the shared input files and the
//! predecessor markers as sources.

use std::collections::HashSet;
use std::fmt;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::template::TemplateEngine;
use crate::description::{Stage, StagePlan};
use crate::error::{GeneratorError, Result};

const MAKEFLOW_TEMPLATE: &str = "# Automatically generated\n\n\
{% for rule in rules %}\n\
{{ rule.target }}: {{ rule.sources | join(\" \") }}\n\
\t{{ rule.command }}\n\
\n\
{% endfor %}";

/// File names that can be listed as rule sources without quoting.
static SOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.+@%,/-]+$").expect("valid source name regex"));

/// Structural problems found by [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    DuplicateTarget(String),
    InvalidReference { node: String, reference: String },
    InvalidFileName(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTarget(target) => write!(f, "Duplicate graph target: '{}'", target),
            Self::InvalidReference { node, reference } => write!(
                f,
                "Node '{}' depends on '{}', which is not declared before it",
                node, reference
            ),
            Self::InvalidFileName(name) => write!(
                f,
                "Input file name '{}' cannot be a workflow source: \
                 only letters, digits and '_.+@%,/-' are allowed",
                name
            ),
        }
    }
}

impl From<GraphError> for GeneratorError {
    fn from(e: GraphError) -> Self {
        GeneratorError::Config(e.to_string())
    }
}

/// One unit of work: a stage instance and what must finish before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub stage: Stage,
    /// Job index; `0` for aggregation stages.
    pub index: u32,
    /// Markers of the nodes this one waits for.
    pub predecessors: Vec<String>,
    pub marker: String,
}

impl GraphNode {
    fn new(stage: Stage, index: u32, predecessors: Vec<String>) -> Self {
        Self {
            stage,
            index,
            predecessors,
            marker: stage.marker(index),
        }
    }

    /// Command line invoking the worker script for this node.
    pub fn command(&self) -> String {
        format!("./{} {} {}", self.stage.script_name(), self.index, self.marker)
    }
}

/// A Makeflow rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub target: String,
    pub sources: Vec<String>,
    pub command: String,
}

#[derive(Serialize)]
struct MakeflowModel<'a> {
    rules: &'a [Rule],
}

/// The dependency graph of a campaign.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<GraphNode>,
    shared_inputs: Vec<String>,
}

impl WorkflowGraph {
    /// Builds the graph of every stage in `plan`.
    ///
    /// Aggregation nodes are present only when the plan has the stage,
    /// which in turn follows the base `NextStages`. Shared input names
    /// must be plain words, since rule sources are space separated.
    pub fn build(plan: &StagePlan) -> Result<Self> {
        let shared_inputs = plan.base().input_files()?;
        if let Some(name) = shared_inputs.iter().find(|f| !SOURCE_NAME.is_match(f)) {
            return Err(GraphError::InvalidFileName(name.clone()).into());
        }

        let range = plan.job_range();
        let mut nodes: Vec<GraphNode> = range
            .indices()
            .map(|index| GraphNode::new(Stage::Sim, index, Vec::new()))
            .collect();
        let sim_markers: Vec<String> = nodes.iter().map(|n| n.marker.clone()).collect();

        for stage in [Stage::SpacePointCalibration, Stage::FinalQa] {
            if plan.has(stage) {
                nodes.push(GraphNode::new(stage, 0, sim_markers.clone()));
            }
        }
        if plan.has(Stage::QaPlots) {
            let preds = vec![Stage::FinalQa.marker(0)];
            nodes.push(GraphNode::new(Stage::QaPlots, 0, preds));
        }

        info!("Workflow graph: {} nodes", nodes.len());
        Ok(Self {
            nodes,
            shared_inputs,
        })
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, marker: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.marker == marker)
    }

    /// Checks that targets are unique and that every predecessor is
    /// declared before the node depending on it, which also rules out
    /// cycles.
    pub fn validate(&self) -> std::result::Result<(), GraphError> {
        let mut declared: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            for pred in &node.predecessors {
                if !declared.contains(pred.as_str()) {
                    return Err(GraphError::InvalidReference {
                        node: node.marker.clone(),
                        reference: pred.clone(),
                    });
                }
            }
            if !declared.insert(&node.marker) {
                return Err(GraphError::DuplicateTarget(node.marker.clone()));
            }
        }
        debug!("Workflow graph is consistent");
        Ok(())
    }

    /// Makeflow rules, in node order.
    pub fn rules(&self) -> Vec<Rule> {
        self.nodes
            .iter()
            .map(|node| {
                let mut sources = vec![node.stage.script_name().to_string()];
                match node.stage {
                    // Waits on the merge before listing inputs
                    Stage::QaPlots => {
                        sources.extend(node.predecessors.iter().cloned());
                        sources.extend(self.shared_inputs.iter().cloned());
                    }
                    _ => {
                        sources.extend(self.shared_inputs.iter().cloned());
                        sources.extend(node.predecessors.iter().cloned());
                    }
                }
                Rule {
                    target: node.marker.clone(),
                    sources,
                    command: node.command(),
                }
            })
            .collect()
    }

    /// Renders the Makeflow text.
    pub fn render(&self, engine: &TemplateEngine) -> Result<String> {
        self.validate()?;
        let rules = self.rules();
        engine.render(MAKEFLOW_TEMPLATE, MakeflowModel { rules: &rules })
    }
}
