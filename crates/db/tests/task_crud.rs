use smartcreate_core::task::{JobCounts, JobRecord, PromptSpec, TaskStatus};
use smartcreate_db::repositories::{BeginExecution, TaskRepo};

fn specs() -> Vec<PromptSpec> {
    vec![
        PromptSpec {
            title: "Sunset".into(),
            prompt: "a sunset over the ocean".into(),
            negative_prompt: None,
        },
        PromptSpec {
            title: "Forest".into(),
            prompt: "a misty forest".into(),
            negative_prompt: Some("blurry, low quality".into()),
        },
    ]
}

fn begin_params(total: i64) -> BeginExecution {
    BeginExecution {
        image_size: "512x768".into(),
        variations_per_spec: 2,
        use_fixed_seed: true,
        seed_base: 1_000_000,
        timeout_secs: 1800,
        graph_template: None,
        total_count: total,
    }
}

#[tokio::test]
async fn create_and_fetch_round_trip() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    smartcreate_db::health_check(&pool).await.unwrap();

    let created = TaskRepo::create(&pool, "batch one", &specs()).await.unwrap();
    assert_eq!(created.status, "pending");
    assert_eq!(created.specs.0.len(), 2);
    assert_eq!(created.total_count, 0);
    assert!(created.started_at.is_none());

    let fetched = TaskRepo::find_by_id(&pool, created.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "batch one");
    assert_eq!(fetched.specs.0, specs());
    assert_eq!(fetched.task_status().unwrap(), TaskStatus::Pending);
}

#[tokio::test]
async fn attach_specs_replaces_the_prompt_list() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    let task = TaskRepo::create(&pool, "batch", &specs()[..1]).await.unwrap();

    TaskRepo::attach_specs(&pool, task.id, &specs()).await.unwrap();

    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.specs.0, specs());
}

#[tokio::test]
async fn find_missing_returns_none() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    assert!(TaskRepo::find_by_id(&pool, 9999).await.unwrap().is_none());
}

#[tokio::test]
async fn begin_execution_freezes_parameters() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    let task = TaskRepo::create(&pool, "batch", &specs()).await.unwrap();

    TaskRepo::begin_execution(&pool, task.id, &begin_params(4)).await.unwrap();

    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.task_status().unwrap(), TaskStatus::Generating);
    assert_eq!(row.image_size, "512x768");
    assert_eq!(row.variations_per_spec, 2);
    assert!(row.use_fixed_seed);
    assert_eq!(row.total_count, 4);
    assert!(row.started_at.is_some());
    assert!(row.jobs.0.is_empty());
}

#[tokio::test]
async fn embedded_jobs_round_trip_with_counts() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    let task = TaskRepo::create(&pool, "batch", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, task.id, &begin_params(4)).await.unwrap();

    let mut jobs = vec![
        JobRecord::pending(0, 0, "aaa".into(), "Sunset (v1)".into(), 1_000_000),
        JobRecord::pending(0, 1, "bbb".into(), "Sunset (v2)".into(), 1_000_001),
        JobRecord::failed(1, 0, "Forest (v1)".into(), 1_000_002, "connection refused".into()),
    ];
    jobs[0].status = smartcreate_core::task::JobStatus::Completed;

    let counts = smartcreate_core::task::tally(&jobs);
    TaskRepo::save_progress(&pool, task.id, &jobs, counts).await.unwrap();

    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.jobs.0, jobs);
    assert_eq!(row.completed_count, 1);
    assert_eq!(row.failed_count, 1);
    // save_progress must leave status alone
    assert_eq!(row.task_status().unwrap(), TaskStatus::Generating);
}

#[tokio::test]
async fn finish_and_reopen() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    let task = TaskRepo::create(&pool, "batch", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, task.id, &begin_params(4)).await.unwrap();

    TaskRepo::finish(&pool, task.id, TaskStatus::Failed, Some("All 4 jobs failed"))
        .await
        .unwrap();
    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.task_status().unwrap(), TaskStatus::Failed);
    assert_eq!(row.error_message.as_deref(), Some("All 4 jobs failed"));
    assert!(row.completed_at.is_some());

    TaskRepo::reopen(&pool, task.id).await.unwrap();
    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.task_status().unwrap(), TaskStatus::Generating);
    assert!(row.error_message.is_none());
    assert!(row.completed_at.is_none());
}

#[tokio::test]
async fn list_active_covers_generating_and_paused() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();

    let generating = TaskRepo::create(&pool, "a", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, generating.id, &begin_params(4)).await.unwrap();

    let paused = TaskRepo::create(&pool, "b", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, paused.id, &begin_params(4)).await.unwrap();
    TaskRepo::update_status(&pool, paused.id, TaskStatus::Paused).await.unwrap();

    let done = TaskRepo::create(&pool, "c", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, done.id, &begin_params(4)).await.unwrap();
    TaskRepo::finish(&pool, done.id, TaskStatus::Completed, None).await.unwrap();

    let _pending = TaskRepo::create(&pool, "d", &specs()).await.unwrap();

    let active: Vec<_> = TaskRepo::list_active(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(active, vec![generating.id, paused.id]);
}

#[tokio::test]
async fn save_progress_is_last_write_wins() {
    let pool = smartcreate_db::connect_in_memory().await.unwrap();
    let task = TaskRepo::create(&pool, "batch", &specs()).await.unwrap();
    TaskRepo::begin_execution(&pool, task.id, &begin_params(2)).await.unwrap();

    // A stop request lands first...
    TaskRepo::finish(&pool, task.id, TaskStatus::Failed, Some("Stopped by user"))
        .await
        .unwrap();

    // ...then a racing tick commits its counters. Status must survive.
    let jobs = vec![JobRecord::pending(0, 0, "aaa".into(), "Sunset (v1)".into(), 7)];
    TaskRepo::save_progress(&pool, task.id, &jobs, JobCounts::default())
        .await
        .unwrap();

    let row = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.task_status().unwrap(), TaskStatus::Failed);
    assert_eq!(row.jobs.0, jobs);
}
