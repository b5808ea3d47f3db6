//! Render submission builder.
//!
//! Turns a prompt spec plus an optional graph template into a
//! submittable job graph. Without a template a minimal built-in graph is
//! used (checkpoint load → two text encodes → empty latent → sample →
//! decode → save), with the default checkpoint model resolved from the
//! render server once and cached for the life of the builder.

use std::sync::Arc;

use tokio::sync::OnceCell;

use smartcreate_core::size::ImageSize;
use smartcreate_core::task::PromptSpec;
use smartcreate_render::RenderBackend;

use crate::error::EngineError;
use crate::graph::{GraphNode, JobGraph, NodeInput, NodeMeta};

/// Keywords that mark an existing encoder text as a negative prompt.
///
/// This is a heuristic, not a guaranteed mapping: an explicit
/// `_meta.role` tag or a "negative" in the node title always wins, and
/// a template whose encoders match none of these falls back to treating
/// the first unclassified encoder as positive, which can silently swap
/// roles on unusual templates.
pub const NEGATIVE_PROMPT_MARKERS: &[&str] =
    &["bad", "worst", "low quality", "lowres", "watermark", "deformed"];

/// Explicit or inferred role of a text-encoding node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptRole {
    Positive,
    Negative,
}

/// Builds job graphs for submission.
pub struct SubmissionBuilder {
    backend: Arc<dyn RenderBackend>,
    default_checkpoint: OnceCell<String>,
}

impl SubmissionBuilder {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            backend,
            default_checkpoint: OnceCell::new(),
        }
    }

    /// Build a submittable graph for one (prompt, variation) slot.
    ///
    /// The result is validated: broken edges or a missing output node
    /// fail here instead of producing a job that can never complete.
    pub async fn build(
        &self,
        spec: &PromptSpec,
        template: Option<&JobGraph>,
        size: ImageSize,
        seed: Option<u32>,
    ) -> Result<JobGraph, EngineError> {
        let graph = match template {
            Some(template) => {
                let mut graph = template.clone();
                rewrite_template(&mut graph, spec, size, seed);
                graph
            }
            None => {
                let checkpoint = self
                    .default_checkpoint
                    .get_or_try_init(|| self.backend.default_checkpoint())
                    .await?;
                minimal_graph(checkpoint, spec, size, seed.unwrap_or(0))
            }
        };

        graph.validate()?;
        Ok(graph)
    }
}

/// Rewrite a cloned template in place for one submission: prompt texts,
/// target resolution, and seed.
fn rewrite_template(graph: &mut JobGraph, spec: &PromptSpec, size: ImageSize, seed: Option<u32>) {
    let (positive_ids, negative_ids) = classify_encoders(graph);

    for id in &positive_ids {
        if let Some(node) = graph.nodes.get_mut(id) {
            node.set_input("text", spec.prompt.clone());
        }
    }
    if let Some(negative) = &spec.negative_prompt {
        for id in &negative_ids {
            if let Some(node) = graph.nodes.get_mut(id) {
                node.set_input("text", negative.clone());
            }
        }
    }

    for node in graph.nodes.values_mut() {
        if node.defines_resolution() {
            node.set_input("width", size.width);
            node.set_input("height", size.height);
        }
        if let Some(seed) = seed {
            if node.is_sampler() {
                if node.inputs.contains_key("seed") {
                    node.set_input("seed", seed);
                }
                if node.inputs.contains_key("noise_seed") {
                    node.set_input("noise_seed", seed);
                }
            }
        }
    }
}

/// Split the graph's text encoders into positive and negative ids.
///
/// Order of precedence per node: explicit `_meta.role` tag, a
/// positive/negative marker in the title, then the keyword sniff on the
/// node's current text. If nothing was classified positive, the first
/// unclassified encoder becomes the positive one (documented fallback).
fn classify_encoders(graph: &JobGraph) -> (Vec<String>, Vec<String>) {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut unclassified = Vec::new();

    for (id, node) in &graph.nodes {
        if !node.is_text_encoder() {
            continue;
        }
        match tagged_role(node) {
            Some(PromptRole::Positive) => positive.push(id.clone()),
            Some(PromptRole::Negative) => negative.push(id.clone()),
            None if has_negative_markers(node) => negative.push(id.clone()),
            None => unclassified.push(id.clone()),
        }
    }

    if positive.is_empty() {
        if let Some(first) = unclassified.into_iter().next() {
            positive.push(first);
        }
    }

    (positive, negative)
}

/// Role from explicit annotations: `_meta.role`, then the node title.
fn tagged_role(node: &GraphNode) -> Option<PromptRole> {
    let meta = node.meta.as_ref()?;

    if let Some(role) = &meta.role {
        match role.to_ascii_lowercase().as_str() {
            "positive" => return Some(PromptRole::Positive),
            "negative" => return Some(PromptRole::Negative),
            _ => {}
        }
    }

    if let Some(title) = &meta.title {
        let title = title.to_ascii_lowercase();
        if title.contains("negative") {
            return Some(PromptRole::Negative);
        }
        if title.contains("positive") {
            return Some(PromptRole::Positive);
        }
    }

    None
}

/// Keyword sniff on the encoder's current text.
fn has_negative_markers(node: &GraphNode) -> bool {
    let Some(text) = node.text() else {
        return false;
    };
    let text = text.to_ascii_lowercase();
    NEGATIVE_PROMPT_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// The built-in fallback graph: load checkpoint → encode prompts →
/// empty latent → sample → decode → save.
fn minimal_graph(checkpoint: &str, spec: &PromptSpec, size: ImageSize, seed: u32) -> JobGraph {
    let mut graph = JobGraph::default();

    graph.nodes.insert(
        "1".into(),
        GraphNode::new("CheckpointLoaderSimple").with_input("ckpt_name", NodeInput::value(checkpoint)),
    );

    let mut positive = GraphNode::new("CLIPTextEncode")
        .with_input("text", NodeInput::value(spec.prompt.clone()))
        .with_input("clip", NodeInput::link("1", 1));
    positive.meta = Some(NodeMeta {
        title: Some("Positive Prompt".into()),
        role: Some("positive".into()),
    });
    graph.nodes.insert("2".into(), positive);

    let mut negative = GraphNode::new("CLIPTextEncode")
        .with_input(
            "text",
            NodeInput::value(
                spec.negative_prompt
                    .clone()
                    .unwrap_or_else(|| "bad hands, worst quality, low quality".to_string()),
            ),
        )
        .with_input("clip", NodeInput::link("1", 1));
    negative.meta = Some(NodeMeta {
        title: Some("Negative Prompt".into()),
        role: Some("negative".into()),
    });
    graph.nodes.insert("3".into(), negative);

    graph.nodes.insert(
        "4".into(),
        GraphNode::new("EmptyLatentImage")
            .with_input("width", NodeInput::value(size.width))
            .with_input("height", NodeInput::value(size.height))
            .with_input("batch_size", NodeInput::value(1)),
    );

    graph.nodes.insert(
        "5".into(),
        GraphNode::new("KSampler")
            .with_input("model", NodeInput::link("1", 0))
            .with_input("positive", NodeInput::link("2", 0))
            .with_input("negative", NodeInput::link("3", 0))
            .with_input("latent_image", NodeInput::link("4", 0))
            .with_input("seed", NodeInput::value(seed))
            .with_input("steps", NodeInput::value(20))
            .with_input("cfg", NodeInput::value(7.0))
            .with_input("sampler_name", NodeInput::value("euler"))
            .with_input("scheduler", NodeInput::value("normal"))
            .with_input("denoise", NodeInput::value(1.0)),
    );

    graph.nodes.insert(
        "6".into(),
        GraphNode::new("VAEDecode")
            .with_input("samples", NodeInput::link("5", 0))
            .with_input("vae", NodeInput::link("1", 2)),
    );

    graph.nodes.insert(
        "7".into(),
        GraphNode::new("SaveImage")
            .with_input("images", NodeInput::link("6", 0))
            .with_input("filename_prefix", NodeInput::value("smartcreate")),
    );

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> PromptSpec {
        PromptSpec {
            title: "Castle".into(),
            prompt: "a castle on a cliff".into(),
            negative_prompt: Some("blurry, oversaturated".into()),
        }
    }

    fn template_with_keywords() -> JobGraph {
        JobGraph::from_value(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "old positive", "clip": ["1", 1]}},
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "bad hands, worst quality", "clip": ["1", 1]}},
            "4": {"class_type": "EmptyLatentImage", "inputs": {"width": 64, "height": 64, "batch_size": 1}},
            "5": {"class_type": "KSampler", "inputs": {
                "model": ["1", 0], "positive": ["2", 0], "negative": ["3", 0],
                "latent_image": ["4", 0], "seed": 1
            }},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["5", 0]}}
        }))
        .unwrap()
    }

    #[test]
    fn keyword_sniff_classifies_negative_encoder() {
        let (positive, negative) = classify_encoders(&template_with_keywords());
        assert_eq!(positive, vec!["2".to_string()]);
        assert_eq!(negative, vec!["3".to_string()]);
    }

    #[test]
    fn explicit_role_tag_beats_keywords() {
        // Text says "negative" things but the tag says positive.
        let graph = JobGraph::from_value(json!({
            "2": {
                "class_type": "CLIPTextEncode",
                "_meta": {"role": "positive"},
                "inputs": {"text": "bad worst low quality"}
            },
            "3": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "CLIP Text Encode (Negative)"},
                "inputs": {"text": "beautiful scenery"}
            },
            "9": {"class_type": "SaveImage", "inputs": {}}
        }))
        .unwrap();

        let (positive, negative) = classify_encoders(&graph);
        assert_eq!(positive, vec!["2".to_string()]);
        assert_eq!(negative, vec!["3".to_string()]);
    }

    #[test]
    fn first_unclassified_encoder_falls_back_to_positive() {
        let graph = JobGraph::from_value(json!({
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "a meadow"}},
            "5": {"class_type": "CLIPTextEncode", "inputs": {"text": "a lake"}},
            "9": {"class_type": "SaveImage", "inputs": {}}
        }))
        .unwrap();

        let (positive, negative) = classify_encoders(&graph);
        assert_eq!(positive, vec!["2".to_string()]);
        assert!(negative.is_empty());
    }

    #[test]
    fn rewrite_sets_prompts_resolution_and_seed() {
        let mut graph = template_with_keywords();
        rewrite_template(&mut graph, &spec(), ImageSize::new(512, 768), Some(42));

        assert_eq!(graph.nodes["2"].text(), Some("a castle on a cliff"));
        assert_eq!(graph.nodes["3"].text(), Some("blurry, oversaturated"));
        assert_eq!(
            graph.nodes["4"].inputs["width"],
            NodeInput::value(512u32)
        );
        assert_eq!(
            graph.nodes["4"].inputs["height"],
            NodeInput::value(768u32)
        );
        assert_eq!(graph.nodes["5"].inputs["seed"], NodeInput::value(42u32));
    }

    #[test]
    fn rewrite_without_negative_prompt_keeps_template_negative() {
        let mut graph = template_with_keywords();
        let spec = PromptSpec {
            title: "Castle".into(),
            prompt: "a castle".into(),
            negative_prompt: None,
        };
        rewrite_template(&mut graph, &spec, ImageSize::new(512, 512), None);

        assert_eq!(graph.nodes["2"].text(), Some("a castle"));
        assert_eq!(graph.nodes["3"].text(), Some("bad hands, worst quality"));
        // No seed supplied: sampler keeps the template's value.
        assert_eq!(graph.nodes["5"].inputs["seed"], NodeInput::value(1));
    }

    #[test]
    fn rewrite_skips_linked_resolution_inputs() {
        let mut graph = JobGraph::from_value(json!({
            "1": {"class_type": "SomeScaler", "inputs": {"width": ["2", 0], "height": 512}},
            "2": {"class_type": "WidthProvider", "inputs": {}},
            "9": {"class_type": "SaveImage", "inputs": {}}
        }))
        .unwrap();
        rewrite_template(&mut graph, &spec(), ImageSize::new(1024, 1024), None);

        // Only nodes with two literal dimension inputs are rewritten.
        assert_eq!(graph.nodes["1"].inputs["width"], NodeInput::link("2", 0));
        assert_eq!(graph.nodes["1"].inputs["height"], NodeInput::value(512));
    }

    #[test]
    fn minimal_graph_is_valid_and_seeded() {
        let graph = minimal_graph("photon.safetensors", &spec(), ImageSize::new(512, 512), 7);
        assert!(graph.validate().is_ok());
        assert_eq!(graph.nodes["5"].inputs["seed"], NodeInput::value(7u32));
        assert_eq!(graph.nodes["2"].text(), Some("a castle on a cliff"));
        assert_eq!(graph.nodes["3"].text(), Some("blurry, oversaturated"));
        assert_eq!(
            graph.nodes["1"].inputs["ckpt_name"],
            NodeInput::value("photon.safetensors")
        );
    }

    #[test]
    fn noise_seed_samplers_are_rewritten_too() {
        let mut graph = JobGraph::from_value(json!({
            "5": {"class_type": "KSamplerAdvanced", "inputs": {"noise_seed": 1}},
            "9": {"class_type": "SaveImage", "inputs": {}}
        }))
        .unwrap();
        rewrite_template(&mut graph, &spec(), ImageSize::new(512, 512), Some(99));
        assert_eq!(graph.nodes["5"].inputs["noise_seed"], NodeInput::value(99u32));
    }
}
