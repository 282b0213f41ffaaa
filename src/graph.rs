//! Caller-supplied knowledge graph state and the task kinds that act on it.
//!
//! The graph itself is opaque: any JSON object is accepted, and its shape is
//! never inspected beyond that.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The caller's current knowledge graph (a JSON object).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphState(Map<String, Value>);

impl GraphState {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Compact JSON form embedded in prompts.
    pub fn to_json_string(&self) -> String {
        // Serializing a Map<String, Value> cannot fail.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Strictly parse a serialized graph state.
///
/// Only a JSON object is accepted; arrays, scalars, and anything that is not
/// JSON (single-quoted keys, trailing commas, unbalanced braces) are rejected.
pub fn parse_graph_state(raw: &str) -> Result<GraphState> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| RelayError::InvalidGraph(format!("graph_json is not valid JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(GraphState(map)),
        other => Err(RelayError::InvalidGraph(format!(
            "graph_json must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What the model is asked to do with the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Expand the graph from an uploaded PDF
    Pdf,
    /// Expand the graph from an uploaded image
    Image,
    /// Refine the graph with no attached file
    Enhancement,
}

impl TaskKind {
    /// Label used inside prompts.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Pdf => "PDF",
            TaskKind::Image => "Image",
            TaskKind::Enhancement => "enhancement",
        }
    }

    /// Whether this task carries an uploaded file.
    pub fn takes_file(&self) -> bool {
        !matches!(self, TaskKind::Enhancement)
    }

    /// Caller-facing success message.
    pub fn success_message(&self) -> &'static str {
        match self {
            TaskKind::Pdf => "PDF processed successfully",
            TaskKind::Image => "Image processed successfully",
            TaskKind::Enhancement => "Knowledge graph updated successfully",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(TaskKind::Pdf),
            "image" => Ok(TaskKind::Image),
            "enhancement" | "update" => Ok(TaskKind::Enhancement),
            other => Err(RelayError::InvalidInput(format!(
                "unknown task kind '{}' (expected pdf, image or enhancement)",
                other
            ))),
        }
    }
}
