//! Poll-based completion tracking.
//!
//! Each tick fetches the render server's live queue once and reconciles
//! every non-terminal job against it: ids still queued are left alone,
//! ids gone from the queue are resolved through history, and ids absent
//! from both long enough are declared lost. Finished outputs are pulled
//! and handed to the artifact store, whose content-hash dedup makes
//! re-processing after a restart harmless.

use std::time::Instant;

use smartcreate_core::task::{all_terminal, tally, terminal_status, JobOutput, JobRecord, JobStatus, TaskStatus};
use smartcreate_core::types::DbId;
use smartcreate_db::repositories::TaskRepo;
use smartcreate_render::QueueSnapshot;

use crate::engine::{BatchEngine, RunParams, TaskControl};
use crate::error::EngineError;

impl BatchEngine {
    /// Tick until every job is terminal or the task's wall-clock budget
    /// runs out. The task row is re-persisted after every tick.
    pub(crate) async fn monitor(
        &self,
        id: DbId,
        params: &RunParams,
        mut jobs: Vec<JobRecord>,
        control: &TaskControl,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        tracing::info!(task_id = id, jobs = jobs.len(), "Monitoring render queue");

        loop {
            if control.stop.is_cancelled() {
                // stop() owns the terminal status; just persist job state.
                TaskRepo::save_progress(&self.pool, id, &jobs, tally(&jobs)).await?;
                return Ok(());
            }
            if control.paused() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }
            if started.elapsed() >= params.timeout {
                TaskRepo::save_progress(&self.pool, id, &jobs, tally(&jobs)).await?;
                let message = format!(
                    "Task timed out after {} seconds",
                    params.timeout.as_secs()
                );
                tracing::warn!(task_id = id, "{message}");
                TaskRepo::finish(&self.pool, id, TaskStatus::Failed, Some(&message)).await?;
                return Ok(());
            }

            let snapshot = match self.backend.queue().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(task_id = id, error = %e, "Queue poll failed, will retry");
                    self.tick_sleep(control).await;
                    continue;
                }
            };

            for job in jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
                if let Err(e) = self.check_job(id, job, &snapshot).await {
                    tracing::warn!(
                        task_id = id,
                        prompt_id = %job.prompt_id,
                        error = %e,
                        "Job status check failed, continuing with remaining jobs",
                    );
                }
            }

            let counts = tally(&jobs);
            TaskRepo::save_progress(&self.pool, id, &jobs, counts).await?;

            if all_terminal(&jobs) {
                let status = terminal_status(counts);
                let error = (status == TaskStatus::Failed)
                    .then(|| format!("All {} jobs failed", jobs.len()));
                TaskRepo::finish(&self.pool, id, status, error.as_deref()).await?;
                tracing::info!(
                    task_id = id,
                    completed = counts.completed,
                    failed = counts.failed,
                    status = status.as_str(),
                    "Batch finished",
                );
                return Ok(());
            }

            self.tick_sleep(control).await;
        }
    }

    /// Reconcile one job against the current queue snapshot.
    async fn check_job(
        &self,
        task_id: DbId,
        job: &mut JobRecord,
        snapshot: &QueueSnapshot,
    ) -> Result<(), EngineError> {
        if snapshot.contains(&job.prompt_id) {
            job.not_found_ticks = 0;
            return Ok(());
        }

        match self.backend.history(&job.prompt_id).await? {
            Some(entry) if entry.status.completed => match entry.first_output() {
                Some(file) => {
                    let bytes = self.backend.fetch_output(file).await?;
                    let metadata = serde_json::json!({
                        "task_id": task_id,
                        "prompt_id": job.prompt_id,
                        "title": job.title,
                        "spec_index": job.spec_index,
                        "variation_index": job.variation_index,
                        "seed": job.seed,
                    });
                    let artifact_id = self.artifacts.store(&bytes, &file.filename, metadata).await?;

                    job.status = JobStatus::Completed;
                    job.output = Some(JobOutput {
                        filename: file.filename.clone(),
                        subfolder: file.subfolder.clone(),
                    });
                    job.error = None;
                    tracing::info!(
                        task_id,
                        prompt_id = %job.prompt_id,
                        artifact_id,
                        filename = %file.filename,
                        "Job completed",
                    );
                }
                None => {
                    job.status = JobStatus::Failed;
                    job.error = Some("Job graph produced no extractable output".into());
                    tracing::warn!(
                        task_id,
                        prompt_id = %job.prompt_id,
                        "Job finished without an output reference",
                    );
                }
            },
            Some(entry) => {
                job.status = JobStatus::Failed;
                job.error = Some(match entry.status.status_str {
                    Some(status) => format!("Render server reported '{status}'"),
                    None => "Render server reported an execution failure".into(),
                });
                tracing::warn!(task_id, prompt_id = %job.prompt_id, "Job failed on the render server");
            }
            None => {
                job.not_found_ticks += 1;
                if job.not_found_ticks > self.config.lost_after_ticks {
                    job.status = JobStatus::Failed;
                    job.error = Some(format!(
                        "Lost: prompt {} disappeared from both queue and history",
                        job.prompt_id
                    ));
                    tracing::warn!(
                        task_id,
                        prompt_id = %job.prompt_id,
                        ticks = job.not_found_ticks,
                        "Job declared lost",
                    );
                }
            }
        }

        Ok(())
    }

    /// Sleep one poll interval, waking early on stop.
    async fn tick_sleep(&self, control: &TaskControl) {
        tokio::select! {
            _ = control.stop.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}
