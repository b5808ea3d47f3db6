//! Batch engine: the orchestrator behind Smart Create execution.
//!
//! One [`BatchEngine`] is constructed at process start and shared by
//! handle; every running task is an independent tokio task spawned by
//! [`execute`](BatchEngine::execute), [`retry`](BatchEngine::retry), or
//! crash recovery ([`recover`](BatchEngine::recover)).
//!
//! Pause and stop are cooperative: each running task owns a
//! [`TaskControl`] (a pause flag plus a cancellation token) that the
//! submission and monitor loops consult at their checkpoints. An
//! in-flight network call is never interrupted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use smartcreate_core::error::CoreError;
use smartcreate_core::seed::{derive_seed, random_seed, FIXED_SEED_BASE};
use smartcreate_core::size::ImageSize;
use smartcreate_core::task::{
    all_terminal, tally, terminal_status, JobRecord, JobStatus, PromptSpec, TaskStatus,
};
use smartcreate_core::types::DbId;
use smartcreate_db::models::TaskRow;
use smartcreate_db::repositories::{BeginExecution, TaskRepo};
use smartcreate_render::RenderBackend;
use smartcreate_store::ArtifactStore;

use crate::builder::SubmissionBuilder;
use crate::error::EngineError;
use crate::graph::JobGraph;

/// Tunable loop parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between monitor ticks (and pause re-checks).
    pub poll_interval: Duration,
    /// Ticks a prompt id may be absent from both queue and history
    /// before its job is declared lost (~5 minutes at the default
    /// interval).
    pub lost_after_ticks: u32,
    /// Wall-clock budget applied when the caller does not specify one.
    pub default_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            lost_after_ticks: 150,
            default_timeout_secs: 1800,
        }
    }
}

/// Parameters of an `execute` call.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Raw job-graph template; `None` selects the built-in minimal graph.
    pub graph_template: Option<serde_json::Value>,
    pub image_size: ImageSize,
    pub variations_per_spec: u32,
    pub use_fixed_seed: bool,
    /// Wall-clock budget in seconds; engine default when `None`.
    pub timeout_secs: Option<i64>,
}

/// Cooperative control signals for one running task.
pub(crate) struct TaskControl {
    paused: AtomicBool,
    pub(crate) stop: CancellationToken,
}

impl TaskControl {
    fn new(paused: bool) -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(paused),
            stop: CancellationToken::new(),
        })
    }

    pub(crate) fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }
}

/// Execution parameters frozen on the task row, parsed once per run.
pub(crate) struct RunParams {
    pub specs: Vec<PromptSpec>,
    pub template: Option<JobGraph>,
    pub size: ImageSize,
    pub variations: u32,
    pub fixed_seed: bool,
    pub seed_base: u32,
    pub timeout: Duration,
}

impl RunParams {
    fn from_row(row: &TaskRow) -> Result<Self, EngineError> {
        let size = row.image_size.parse::<ImageSize>()?;
        let template = row
            .graph_template
            .as_ref()
            .map(|raw| JobGraph::from_value(raw.0.clone()))
            .transpose()?;

        Ok(Self {
            specs: row.specs.0.clone(),
            template,
            size,
            variations: row.variations_per_spec.max(1) as u32,
            fixed_seed: row.use_fixed_seed,
            seed_base: row.seed_base as u32,
            timeout: Duration::from_secs(row.timeout_secs.max(1) as u64),
        })
    }
}

/// What a spawned run should do before it starts monitoring.
enum RunMode {
    /// Submit every (prompt, variation) slot.
    Submit,
    /// Re-submit only failed jobs, in place.
    RetryFailed,
    /// Jobs already exist; go straight to monitoring.
    MonitorOnly,
}

/// The batch render orchestrator.
///
/// Constructed once at process start; there is no global instance.
pub struct BatchEngine {
    pub(crate) pool: SqlitePool,
    pub(crate) backend: Arc<dyn RenderBackend>,
    pub(crate) builder: SubmissionBuilder,
    pub(crate) artifacts: Arc<ArtifactStore>,
    pub(crate) config: EngineConfig,
    controls: RwLock<HashMap<DbId, Arc<TaskControl>>>,
}

impl BatchEngine {
    /// Wire up the engine. The returned handle is cheap to clone into
    /// whatever upstream layer drives it.
    pub fn new(
        pool: SqlitePool,
        backend: Arc<dyn RenderBackend>,
        artifacts: Arc<ArtifactStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            builder: SubmissionBuilder::new(Arc::clone(&backend)),
            backend,
            artifacts,
            config,
            controls: RwLock::new(HashMap::new()),
        })
    }

    // ── Upstream entry points ────────────────────────────────────────

    /// Create a new pending task with an initial (possibly empty)
    /// prompt list.
    pub async fn create_task(
        &self,
        name: &str,
        specs: &[PromptSpec],
    ) -> Result<TaskRow, EngineError> {
        let row = TaskRepo::create(&self.pool, name, specs).await?;
        tracing::info!(task_id = row.id, prompts = specs.len(), "Task created");
        Ok(row)
    }

    /// Replace the prompt list of a task that has not started yet.
    pub async fn attach_specs(&self, id: DbId, specs: &[PromptSpec]) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        match row.task_status()? {
            TaskStatus::Pending | TaskStatus::Analyzing => {}
            other => {
                return Err(EngineError::InvalidState {
                    id,
                    status: other.as_str().to_string(),
                    expected: "pending or analyzing",
                })
            }
        }
        Ok(TaskRepo::attach_specs(&self.pool, id, specs).await?)
    }

    /// Fetch a task row.
    pub async fn task(&self, id: DbId) -> Result<TaskRow, EngineError> {
        self.require(id).await
    }

    /// Freeze parameters and launch the batch.
    ///
    /// Returns as soon as the run is spawned; progress is observable on
    /// the task row.
    pub async fn execute(
        self: &Arc<Self>,
        id: DbId,
        options: ExecuteOptions,
    ) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        match row.task_status()? {
            TaskStatus::Pending | TaskStatus::Analyzing => {}
            other => {
                return Err(EngineError::InvalidState {
                    id,
                    status: other.as_str().to_string(),
                    expected: "pending or analyzing",
                })
            }
        }

        if row.specs.0.is_empty() {
            return Err(CoreError::Validation("Task has no prompts attached".into()).into());
        }
        if options.variations_per_spec == 0 {
            return Err(
                CoreError::Validation("variations_per_spec must be at least 1".into()).into(),
            );
        }
        // Fail fast on templates that do not even parse; per-submission
        // validation still guards the rewritten graphs.
        if let Some(template) = &options.graph_template {
            JobGraph::from_value(template.clone())?;
        }

        let total = row.specs.0.len() as i64 * options.variations_per_spec as i64;
        TaskRepo::begin_execution(
            &self.pool,
            id,
            &BeginExecution {
                image_size: options.image_size.to_string(),
                variations_per_spec: options.variations_per_spec as i64,
                use_fixed_seed: options.use_fixed_seed,
                seed_base: FIXED_SEED_BASE as i64,
                timeout_secs: options
                    .timeout_secs
                    .unwrap_or(self.config.default_timeout_secs),
                graph_template: options.graph_template,
                total_count: total,
            },
        )
        .await?;

        tracing::info!(task_id = id, total, "Task execution starting");
        self.spawn_run(id, false, RunMode::Submit).await;
        Ok(())
    }

    /// Suspend monitoring (and further submissions) at the next loop
    /// checkpoint. Job state is untouched.
    pub async fn pause(&self, id: DbId) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        match row.task_status()? {
            TaskStatus::Generating => {}
            other => {
                return Err(EngineError::InvalidState {
                    id,
                    status: other.as_str().to_string(),
                    expected: "generating",
                })
            }
        }

        let control = self.control(id).await.ok_or_else(|| {
            EngineError::Core(CoreError::Internal(format!(
                "Task {id} has no running execution loop"
            )))
        })?;
        control.set_paused(true);
        TaskRepo::update_status(&self.pool, id, TaskStatus::Paused).await?;
        tracing::info!(task_id = id, "Task paused");
        Ok(())
    }

    /// Resume a paused task.
    pub async fn resume(&self, id: DbId) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        match row.task_status()? {
            TaskStatus::Paused => {}
            other => {
                return Err(EngineError::InvalidState {
                    id,
                    status: other.as_str().to_string(),
                    expected: "paused",
                })
            }
        }

        let control = self.control(id).await.ok_or_else(|| {
            EngineError::Core(CoreError::Internal(format!(
                "Task {id} has no running execution loop"
            )))
        })?;
        control.set_paused(false);
        TaskRepo::update_status(&self.pool, id, TaskStatus::Generating).await?;
        tracing::info!(task_id = id, "Task resumed");
        Ok(())
    }

    /// Stop a task: cancel its loops at their next checkpoint,
    /// best-effort cancel outstanding prompts on the render server, and
    /// mark the task failed.
    pub async fn stop(&self, id: DbId) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        let status = row.task_status()?;
        if !status.is_active() {
            return Err(EngineError::InvalidState {
                id,
                status: status.as_str().to_string(),
                expected: "generating or paused",
            });
        }

        if let Some(control) = self.control(id).await {
            control.stop.cancel();
        }

        // Best-effort cancellation of whatever has been persisted so
        // far; a submission phase still in flight cancels its own
        // in-memory prompt ids when it hits the stop checkpoint.
        let pending = pending_prompt_ids(&row.jobs.0);
        if !pending.is_empty() {
            if let Err(e) = self.backend.delete_from_queue(&pending).await {
                tracing::warn!(task_id = id, error = %e, "Queue-delete on stop failed");
            }
        }
        if let Err(e) = self.backend.interrupt().await {
            tracing::warn!(task_id = id, error = %e, "Interrupt on stop failed");
        }

        TaskRepo::finish(&self.pool, id, TaskStatus::Failed, Some("Stopped by user")).await?;
        tracing::info!(task_id = id, "Task stopped");
        Ok(())
    }

    /// Re-submit exactly the failed jobs of a finished task and monitor
    /// the whole batch again. Completed jobs are untouched.
    pub async fn retry(self: &Arc<Self>, id: DbId) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        let status = row.task_status()?;
        if !status.is_terminal() {
            return Err(EngineError::InvalidState {
                id,
                status: status.as_str().to_string(),
                expected: "completed or failed",
            });
        }
        if !row.jobs.0.iter().any(|j| j.status == JobStatus::Failed) {
            return Err(CoreError::Validation("Task has no failed jobs to retry".into()).into());
        }

        TaskRepo::reopen(&self.pool, id).await?;
        tracing::info!(task_id = id, "Retrying failed jobs");
        self.spawn_run(id, false, RunMode::RetryFailed).await;
        Ok(())
    }

    /// Resume tasks that were mid-execution when the process died.
    ///
    /// Tasks with persisted jobs resume monitoring only: nothing is
    /// re-submitted, which is what prevents duplicate render work after
    /// a crash. Tasks that died before any submission are restarted
    /// from scratch, which is safe precisely because nothing was
    /// submitted yet.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, EngineError> {
        let rows = TaskRepo::list_active(&self.pool).await?;
        let count = rows.len();

        for row in rows {
            let paused = row.task_status()? == TaskStatus::Paused;
            let jobs = &row.jobs.0;

            if jobs.is_empty() {
                tracing::info!(task_id = row.id, "Recovery: no jobs were submitted, restarting");
                self.spawn_run(row.id, paused, RunMode::Submit).await;
            } else if all_terminal(jobs) {
                // Crashed between the last tick and the terminal commit.
                let counts = tally(jobs);
                let status = terminal_status(counts);
                let error = (status == TaskStatus::Failed)
                    .then(|| format!("All {} jobs failed", jobs.len()));
                TaskRepo::finish(&self.pool, row.id, status, error.as_deref()).await?;
                tracing::info!(task_id = row.id, status = status.as_str(), "Recovery: finalized");
            } else {
                tracing::info!(
                    task_id = row.id,
                    jobs = jobs.len(),
                    "Recovery: resuming monitoring",
                );
                self.spawn_run(row.id, paused, RunMode::MonitorOnly).await;
            }
        }

        Ok(count)
    }

    // ── Run lifecycle ────────────────────────────────────────────────

    /// Register a fresh control and spawn the run loop.
    async fn spawn_run(self: &Arc<Self>, id: DbId, paused: bool, mode: RunMode) {
        let control = TaskControl::new(paused);
        self.controls.write().await.insert(id, Arc::clone(&control));

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(id, control, mode).await;
        });
    }

    async fn run(self: Arc<Self>, id: DbId, control: Arc<TaskControl>, mode: RunMode) {
        if let Err(e) = self.run_inner(id, &control, mode).await {
            tracing::error!(task_id = id, error = %e, "Task execution aborted");
            let message = e.to_string();
            if let Err(persist) =
                TaskRepo::finish(&self.pool, id, TaskStatus::Failed, Some(&message)).await
            {
                tracing::error!(task_id = id, error = %persist, "Failed to record task failure");
            }
        }
        self.controls.write().await.remove(&id);
    }

    async fn run_inner(
        &self,
        id: DbId,
        control: &TaskControl,
        mode: RunMode,
    ) -> Result<(), EngineError> {
        let row = self.require(id).await?;
        let params = RunParams::from_row(&row)?;

        let (jobs, stopped) = match mode {
            RunMode::Submit => self.submit_all(id, &params, control).await?,
            RunMode::RetryFailed => {
                self.resubmit_failed(id, row.jobs.0.clone(), &params, control).await?
            }
            RunMode::MonitorOnly => (row.jobs.0.clone(), false),
        };

        if stopped {
            // stop() already finalized the task row.
            return Ok(());
        }
        self.monitor(id, &params, jobs, control).await
    }

    // ── Submission phase ─────────────────────────────────────────────

    /// Submit every (prompt, variation) slot in declared order.
    ///
    /// Submission failures become failed jobs without aborting the
    /// batch. Returns the full job list and whether a stop cut the
    /// phase short.
    async fn submit_all(
        &self,
        id: DbId,
        params: &RunParams,
        control: &TaskControl,
    ) -> Result<(Vec<JobRecord>, bool), EngineError> {
        let mut jobs: Vec<JobRecord> =
            Vec::with_capacity(params.specs.len() * params.variations as usize);
        let mut stopped = false;

        'specs: for (spec_index, spec) in params.specs.iter().enumerate() {
            for variation in 0..params.variations {
                if self.wait_checkpoint(control).await {
                    stopped = true;
                    break 'specs;
                }

                let seed = self.seed_for(params, spec_index as u32, variation);
                let title = job_title(spec, variation, params.variations);

                match self.submit_one(spec, params, seed).await {
                    Ok(prompt_id) => {
                        tracing::info!(
                            task_id = id,
                            prompt_id = %prompt_id,
                            spec_index,
                            variation,
                            seed,
                            "Job submitted",
                        );
                        jobs.push(JobRecord::pending(
                            spec_index as u32,
                            variation,
                            prompt_id,
                            title,
                            seed as i64,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(
                            task_id = id,
                            spec_index,
                            variation,
                            error = %e,
                            "Submission failed, continuing with remaining jobs",
                        );
                        jobs.push(JobRecord::failed(
                            spec_index as u32,
                            variation,
                            title,
                            seed as i64,
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        if stopped {
            self.cancel_pending(id, &jobs).await;
        }

        TaskRepo::save_progress(&self.pool, id, &jobs, tally(&jobs)).await?;
        Ok((jobs, stopped))
    }

    /// Re-submit failed jobs in place: each gets a fresh prompt id and
    /// goes back to pending; the old id is abandoned.
    async fn resubmit_failed(
        &self,
        id: DbId,
        mut jobs: Vec<JobRecord>,
        params: &RunParams,
        control: &TaskControl,
    ) -> Result<(Vec<JobRecord>, bool), EngineError> {
        let mut stopped = false;

        for index in 0..jobs.len() {
            if jobs[index].status != JobStatus::Failed {
                continue;
            }
            if self.wait_checkpoint(control).await {
                stopped = true;
                break;
            }

            let job = &jobs[index];
            let Some(spec) = params.specs.get(job.spec_index as usize) else {
                tracing::error!(
                    task_id = id,
                    spec_index = job.spec_index,
                    "Retry skipped: prompt spec index out of range",
                );
                continue;
            };

            let seed = self.seed_for(params, job.spec_index, job.variation_index);
            match self.submit_one(spec, params, seed).await {
                Ok(prompt_id) => {
                    tracing::info!(
                        task_id = id,
                        old_prompt_id = %job.prompt_id,
                        prompt_id = %prompt_id,
                        "Job re-submitted",
                    );
                    let job = &mut jobs[index];
                    job.prompt_id = prompt_id;
                    job.status = JobStatus::Pending;
                    job.seed = seed as i64;
                    job.output = None;
                    job.not_found_ticks = 0;
                    job.error = None;
                }
                Err(e) => {
                    tracing::warn!(task_id = id, error = %e, "Re-submission failed");
                    jobs[index].error = Some(e.to_string());
                }
            }
        }

        if stopped {
            self.cancel_pending(id, &jobs).await;
        }

        TaskRepo::save_progress(&self.pool, id, &jobs, tally(&jobs)).await?;
        Ok((jobs, stopped))
    }

    /// Build and submit one graph.
    async fn submit_one(
        &self,
        spec: &PromptSpec,
        params: &RunParams,
        seed: u32,
    ) -> Result<String, EngineError> {
        let graph = self
            .builder
            .build(spec, params.template.as_ref(), params.size, Some(seed))
            .await?;
        Ok(self.backend.submit(&graph.to_value()).await?)
    }

    fn seed_for(&self, params: &RunParams, spec_index: u32, variation_index: u32) -> u32 {
        if params.fixed_seed {
            derive_seed(params.seed_base, spec_index, params.variations, variation_index)
        } else {
            random_seed()
        }
    }

    /// Best-effort queue-delete of in-memory pending prompt ids when a
    /// stop interrupts a submission phase (stop() itself only sees what
    /// was already persisted).
    async fn cancel_pending(&self, id: DbId, jobs: &[JobRecord]) {
        let pending = pending_prompt_ids(jobs);
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.backend.delete_from_queue(&pending).await {
            tracing::warn!(task_id = id, error = %e, "Queue-delete of submitted jobs failed");
        }
    }

    /// Cooperative checkpoint: wait out a pause, return whether a stop
    /// arrived.
    pub(crate) async fn wait_checkpoint(&self, control: &TaskControl) -> bool {
        loop {
            if control.stop.is_cancelled() {
                return true;
            }
            if !control.paused() {
                return false;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    pub(crate) async fn require(&self, id: DbId) -> Result<TaskRow, EngineError> {
        TaskRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(EngineError::TaskNotFound(id))
    }

    async fn control(&self, id: DbId) -> Option<Arc<TaskControl>> {
        self.controls.read().await.get(&id).map(Arc::clone)
    }
}

/// Prompt ids of jobs still pending on the render server.
fn pending_prompt_ids(jobs: &[JobRecord]) -> Vec<String> {
    jobs.iter()
        .filter(|j| j.status == JobStatus::Pending && !j.prompt_id.is_empty())
        .map(|j| j.prompt_id.clone())
        .collect()
}

/// Display title for one (prompt, variation) slot.
fn job_title(spec: &PromptSpec, variation_index: u32, variations_per_spec: u32) -> String {
    if variations_per_spec > 1 {
        format!("{} (v{})", spec.title, variation_index + 1)
    } else {
        spec.title.clone()
    }
}
