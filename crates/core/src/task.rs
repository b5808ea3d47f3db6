//! Batch task and job state: statuses, embedded records, and the
//! aggregate-count rules the monitor applies every tick.
//!
//! A task is a user-declared batch of prompts × variations. Jobs are
//! ephemeral per-submission records embedded in the task row (not a
//! separate table); each one tracks a single render-server prompt id.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle status of a batch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, prompts may still be attached.
    Pending,
    /// Upstream prompt generation is still producing the prompt list.
    Analyzing,
    /// Submission or monitoring in progress.
    Generating,
    /// Monitoring suspended by the user; job state untouched.
    Paused,
    /// Terminal: at least one job succeeded.
    Completed,
    /// Terminal: zero successes, explicit stop, or timeout.
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "analyzing" => Ok(Self::Analyzing),
            "generating" => Ok(Self::Generating),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown task status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Tasks in these states have (or may have) a live execution loop.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Generating | Self::Paused)
    }
}

// ---------------------------------------------------------------------------
// Job status and embedded records
// ---------------------------------------------------------------------------

/// Status of a single render submission within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One prompt of a batch: display title plus the text fed to the
/// positive (and optionally negative) text-encode nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

/// Output reference reported by the render server for a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
}

/// One submission, embedded in the task's job list.
///
/// `prompt_id` is assigned by the render server and is overwritten in
/// place when a failed job is retried; the old id is abandoned, never
/// reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub spec_index: u32,
    pub variation_index: u32,
    pub prompt_id: String,
    pub title: String,
    pub status: JobStatus,
    pub seed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    /// Consecutive monitor ticks the prompt id was absent from both the
    /// live queue and the history. Reset whenever the id reappears.
    #[serde(default)]
    pub not_found_ticks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Freshly submitted job awaiting completion.
    pub fn pending(
        spec_index: u32,
        variation_index: u32,
        prompt_id: String,
        title: String,
        seed: i64,
    ) -> Self {
        Self {
            spec_index,
            variation_index,
            prompt_id,
            title,
            status: JobStatus::Pending,
            seed,
            output: None,
            not_found_ticks: 0,
            error: None,
        }
    }

    /// Job whose submission (or graph build) failed before it reached
    /// the render server.
    pub fn failed(
        spec_index: u32,
        variation_index: u32,
        title: String,
        seed: i64,
        error: String,
    ) -> Self {
        Self {
            spec_index,
            variation_index,
            prompt_id: String::new(),
            title,
            status: JobStatus::Failed,
            seed,
            output: None,
            not_found_ticks: 0,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Completed/failed tallies recomputed from the job list each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub completed: i64,
    pub failed: i64,
}

impl JobCounts {
    pub fn terminal(self) -> i64 {
        self.completed + self.failed
    }
}

/// Recompute aggregate counts from the embedded job list.
pub fn tally(jobs: &[JobRecord]) -> JobCounts {
    let mut counts = JobCounts::default();
    for job in jobs {
        match job.status {
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Pending => {}
        }
    }
    counts
}

/// True once every job in the list is terminal.
pub fn all_terminal(jobs: &[JobRecord]) -> bool {
    jobs.iter().all(|j| j.status.is_terminal())
}

/// Terminal status for a finished batch: `Completed` when at least one
/// job succeeded, `Failed` when none did.
pub fn terminal_status(counts: JobCounts) -> TaskStatus {
    if counts.completed > 0 {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus) -> JobRecord {
        JobRecord {
            spec_index: 0,
            variation_index: 0,
            prompt_id: "p".into(),
            title: "t".into(),
            status,
            seed: 0,
            output: None,
            not_found_ticks: 0,
            error: None,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Analyzing,
            TaskStatus::Generating,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_and_active_are_disjoint() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Generating.is_terminal());
        assert!(TaskStatus::Generating.is_active());
        assert!(TaskStatus::Paused.is_active());
        assert!(!TaskStatus::Completed.is_active());
    }

    #[test]
    fn tally_counts_by_status() {
        let jobs = vec![
            job(JobStatus::Completed),
            job(JobStatus::Completed),
            job(JobStatus::Failed),
            job(JobStatus::Pending),
        ];
        let counts = tally(&jobs);
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.terminal(), 3);
        assert!(!all_terminal(&jobs));
    }

    #[test]
    fn terminal_status_needs_one_success() {
        assert_eq!(
            terminal_status(JobCounts { completed: 5, failed: 1 }),
            TaskStatus::Completed
        );
        assert_eq!(
            terminal_status(JobCounts { completed: 0, failed: 6 }),
            TaskStatus::Failed
        );
    }

    #[test]
    fn job_record_serde_round_trip() {
        let record = JobRecord::pending(2, 1, "abc-123".into(), "Sunset (v2)".into(), 1009);
        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn failed_record_has_no_prompt_id() {
        let record = job_failed();
        assert!(record.prompt_id.is_empty());
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.is_some());
    }

    fn job_failed() -> JobRecord {
        JobRecord::failed(0, 0, "t".into(), 7, "connection refused".into())
    }
}
