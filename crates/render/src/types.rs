//! Typed views of the render server's queue and history payloads.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Live queue
// ---------------------------------------------------------------------------

/// Wire shape of `GET /queue`: entries are heterogeneous arrays
/// `[seq, prompt_id, ...]`; only the prompt id matters here.
#[derive(Debug, Deserialize)]
pub(crate) struct RawQueue {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

/// Prompt ids currently known to the render server's scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: HashSet<String>,
    pub pending: HashSet<String>,
}

impl QueueSnapshot {
    /// Whether the prompt id is live in either set.
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.running.contains(prompt_id) || self.pending.contains(prompt_id)
    }
}

impl From<RawQueue> for QueueSnapshot {
    fn from(raw: RawQueue) -> Self {
        Self {
            running: raw.queue_running.iter().filter_map(entry_prompt_id).collect(),
            pending: raw.queue_pending.iter().filter_map(entry_prompt_id).collect(),
        }
    }
}

/// Second element of a queue entry array is the prompt id.
fn entry_prompt_id(entry: &serde_json::Value) -> Option<String> {
    entry.get(1)?.as_str().map(str::to_string)
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One file reference in a node's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Output folder category (`output`, `temp`, ...).
    #[serde(rename = "type", default)]
    pub folder_type: String,
}

/// Per-node outputs recorded in a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutputs {
    #[serde(default)]
    pub images: Vec<OutputFile>,
    /// Animated outputs (WEBP/GIF savers report under this key).
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
}

/// Execution outcome block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status_str: Option<String>,
}

/// A finished (successfully or not) prompt as reported by
/// `GET /history/{prompt_id}`.
///
/// Outputs are keyed by node id; a `BTreeMap` keeps extraction order
/// deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: HistoryStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutputs>,
}

impl HistoryEntry {
    /// First image output, falling back to the first animated output.
    pub fn first_output(&self) -> Option<&OutputFile> {
        self.outputs
            .values()
            .find_map(|node| node.images.first())
            .or_else(|| self.outputs.values().find_map(|node| node.gifs.first()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_snapshot_extracts_prompt_ids() {
        let raw: RawQueue = serde_json::from_value(json!({
            "queue_running": [[0, "run-1", {"extra": true}]],
            "queue_pending": [[1, "pend-1"], [2, "pend-2"]],
        }))
        .unwrap();
        let snapshot = QueueSnapshot::from(raw);

        assert!(snapshot.contains("run-1"));
        assert!(snapshot.contains("pend-2"));
        assert!(!snapshot.contains("gone"));
        assert_eq!(snapshot.running.len(), 1);
        assert_eq!(snapshot.pending.len(), 2);
    }

    #[test]
    fn queue_snapshot_tolerates_malformed_entries() {
        let raw: RawQueue = serde_json::from_value(json!({
            "queue_running": [[0], "noise", [1, 42]],
            "queue_pending": [],
        }))
        .unwrap();
        let snapshot = QueueSnapshot::from(raw);
        assert!(snapshot.running.is_empty());
        assert!(snapshot.pending.is_empty());
    }

    #[test]
    fn history_entry_parses_outputs() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "status": {"completed": true, "status_str": "success"},
            "outputs": {
                "9": {"images": [
                    {"filename": "img_00001_.png", "subfolder": "", "type": "output"}
                ]}
            }
        }))
        .unwrap();

        assert!(entry.status.completed);
        let output = entry.first_output().unwrap();
        assert_eq!(output.filename, "img_00001_.png");
        assert_eq!(output.folder_type, "output");
    }

    #[test]
    fn first_output_prefers_images_over_gifs() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "status": {"completed": true},
            "outputs": {
                "3": {"gifs": [{"filename": "anim.webp"}]},
                "9": {"images": [{"filename": "still.png"}]}
            }
        }))
        .unwrap();
        assert_eq!(entry.first_output().unwrap().filename, "still.png");
    }

    #[test]
    fn animated_only_graph_still_yields_an_output() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "status": {"completed": true},
            "outputs": {"3": {"gifs": [{"filename": "anim.webp"}]}}
        }))
        .unwrap();
        assert_eq!(entry.first_output().unwrap().filename, "anim.webp");
    }

    #[test]
    fn outputless_entry_has_no_extractable_output() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "status": {"completed": true},
            "outputs": {}
        }))
        .unwrap();
        assert!(entry.first_output().is_none());
    }
}
