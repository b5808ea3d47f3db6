//! Typed job graphs.
//!
//! The render server consumes a flat map of node id to node, where each
//! node input is either a literal value or an edge `[target_node_id,
//! output_slot]`. Representing edges as a typed variant (instead of
//! poking at nested JSON) lets the builder rewrite graphs safely and
//! lets [`JobGraph::validate`] reject broken templates before they are
//! submitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Problems with a job graph or template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Invalid graph template: {0}")]
    Template(String),

    #[error("Input '{input}' of node {node} references missing node {target}")]
    DanglingEdge {
        node: String,
        input: String,
        target: String,
    },

    #[error("Graph contains no output-producing node")]
    NoOutputNode,
}

/// A single node input: either an edge to another node's output slot or
/// a literal value.
///
/// The wire shape of an edge is a two-element array `["4", 0]`; that is
/// exactly what the untagged deserialization matches first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeInput {
    Link(String, u32),
    Value(serde_json::Value),
}

impl NodeInput {
    pub fn value(v: impl Into<serde_json::Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn link(target: &str, slot: u32) -> Self {
        Self::Link(target.to_string(), slot)
    }

    /// Literal string payload, if this input is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(v) => v.as_str(),
            Self::Link(..) => None,
        }
    }

    fn is_literal(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

/// Optional node annotations carried under `_meta`.
///
/// `role` is an explicit positive/negative tag some templates provide;
/// when present it overrides the keyword heuristics in the builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// One node of a job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub class_type: String,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
    #[serde(default)]
    pub inputs: BTreeMap<String, NodeInput>,
}

impl GraphNode {
    pub fn new(class_type: &str) -> Self {
        Self {
            class_type: class_type.to_string(),
            meta: None,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, name: &str, input: NodeInput) -> Self {
        self.inputs.insert(name.to_string(), input);
        self
    }

    /// Text-encoding nodes carry the prompt text.
    pub fn is_text_encoder(&self) -> bool {
        self.class_type.contains("TextEncode")
    }

    /// Sampler nodes carry the seed.
    pub fn is_sampler(&self) -> bool {
        self.class_type.contains("Sampler")
    }

    /// Nodes with literal `width` and `height` inputs define the target
    /// resolution.
    pub fn defines_resolution(&self) -> bool {
        self.inputs.get("width").is_some_and(NodeInput::is_literal)
            && self.inputs.get("height").is_some_and(NodeInput::is_literal)
    }

    /// Nodes whose class writes files are outputs of the graph.
    pub fn is_output(&self) -> bool {
        self.class_type.starts_with("Save") || self.class_type == "PreviewImage"
    }

    /// Literal text of this node's `text` input, if any.
    pub fn text(&self) -> Option<&str> {
        self.inputs.get("text").and_then(NodeInput::as_str)
    }

    pub fn set_input(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.inputs
            .insert(name.to_string(), NodeInput::Value(value.into()));
    }
}

/// A complete job graph, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    pub nodes: BTreeMap<String, GraphNode>,
}

impl JobGraph {
    /// Parse a raw template into a typed graph.
    pub fn from_value(value: serde_json::Value) -> Result<Self, GraphError> {
        serde_json::from_value(value).map_err(|e| GraphError::Template(e.to_string()))
    }

    /// Wire representation submitted to the render server.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("job graph serialization cannot fail")
    }

    /// Check the graph is submittable: every edge must point at an
    /// existing node and at least one node must produce an output file.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (id, node) in &self.nodes {
            for (input, value) in &node.inputs {
                if let NodeInput::Link(target, _) = value {
                    if !self.nodes.contains_key(target) {
                        return Err(GraphError::DanglingEdge {
                            node: id.clone(),
                            input: input.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        if !self.nodes.values().any(GraphNode::is_output) {
            return Err(GraphError::NoOutputNode);
        }

        Ok(())
    }
}
