#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::thread::ThreadId;
    use std::time::Duration;

    use axum::{
        extract::{Path as UrlPath, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, patch, post},
        Json, Router,
    };
    use serde_json::json;

    use renderfarm_core::{
        config::ManagerConfig,
        models::{ManagerCapacity, ManagerRegistration, Task, TaskStatus, TaskStatusReport},
        FarmResult,
    };
    use renderfarm_domain::{CompiledCommand, TaskCompilerRegistry, ThumbnailGenerator};
    use renderfarm_manager::{
        ManagerService, ReportOutcome, RunOutcome, ServerClient, TaskRunner,
    };
    use renderfarm_testing_utils::{ManagerBuilder, TaskBuilder, TestEnv};

    /// 模拟服务器：按顺序派发预置任务，记录全部状态上报
    #[derive(Default)]
    struct StubServer {
        queue: VecDeque<Task>,
        reports: Vec<(i64, TaskStatusReport)>,
        reject_progress: bool,
        registrations: Vec<ManagerRegistration>,
    }

    type Shared = Arc<Mutex<StubServer>>;

    async fn register(
        State(state): State<Shared>,
        Json(registration): Json<ManagerRegistration>,
    ) -> Json<serde_json::Value> {
        let manager = ManagerBuilder::new()
            .with_id(5)
            .with_name(&registration.name)
            .with_address(&registration.host, registration.port)
            .build();
        state.lock().unwrap().registrations.push(registration);
        Json(json!({"success": true, "data": manager, "timestamp": "2026-01-01T00:00:00Z"}))
    }

    async fn poll(State(state): State<Shared>) -> Response {
        match state.lock().unwrap().queue.pop_front() {
            Some(task) => Json(task).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn report(
        State(state): State<Shared>,
        UrlPath(id): UrlPath<i64>,
        Json(report): Json<TaskStatusReport>,
    ) -> StatusCode {
        let mut state = state.lock().unwrap();
        let rejected = state.reject_progress && report.status == TaskStatus::Processing;
        state.reports.push((id, report));
        if rejected {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::NO_CONTENT
        }
    }

    async fn spawn_stub(state: Shared) -> String {
        let app = Router::new()
            .route("/api/managers", post(register))
            .route("/api/tasks", get(poll))
            .route("/api/tasks/{id}", patch(report))
            .with_state(state);
        let listener = TestEnv::local_listener().await;
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    struct RecordingThumbnails {
        calls: Mutex<Vec<PathBuf>>,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl ThumbnailGenerator for RecordingThumbnails {
        fn generate(&self, source: &Path, task_id: i64) -> FarmResult<PathBuf> {
            self.calls.lock().unwrap().push(source.to_path_buf());
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(PathBuf::from(format!("/farm/storage/thumbnail_{task_id}.png")))
        }
    }

    fn thumbnails() -> Arc<RecordingThumbnails> {
        Arc::new(RecordingThumbnails {
            calls: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    async fn runner_for(state: &Shared, thumbnails: Arc<RecordingThumbnails>) -> TaskRunner {
        let base = spawn_stub(state.clone()).await;
        let client = Arc::new(ServerClient::new(&base, Duration::from_secs(5)).unwrap());
        TaskRunner::new(client, thumbnails, Duration::from_millis(50))
    }

    fn collected_log(state: &StubServer) -> String {
        state
            .reports
            .iter()
            .filter_map(|(_, r)| r.log.clone())
            .collect()
    }

    fn shell(script: &str) -> CompiledCommand {
        CompiledCommand::new(["sh", "-c", script])
    }

    #[tokio::test]
    async fn test_client_register_poll_and_report() {
        let state = Shared::default();
        state
            .lock()
            .unwrap()
            .queue
            .push_back(TaskBuilder::new().with_id(8).build());
        let base = spawn_stub(state.clone()).await;
        let client = ServerClient::new(&base, Duration::from_secs(5)).unwrap();

        let manager = client
            .register(&ManagerRegistration {
                name: "node-a".to_string(),
                host: "10.0.0.5".to_string(),
                port: 7788,
                capacity: ManagerCapacity::Fixed(2),
            })
            .await
            .unwrap();
        assert_eq!(manager.id, 5);
        assert_eq!(manager.port, 7788);
        assert_eq!(state.lock().unwrap().registrations[0].name, "node-a");

        let task = client.poll(5, "node-a-0", None).await.unwrap().unwrap();
        assert_eq!(task.id, 8);
        assert!(client.poll(5, "node-a-0", None).await.unwrap().is_none());

        let outcome = client
            .report(8, &TaskStatusReport::new(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Accepted);

        state.lock().unwrap().reject_progress = true;
        let outcome = client
            .report(8, &TaskStatusReport::new(TaskStatus::Processing))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Rejected(reqwest::StatusCode::UNPROCESSABLE_ENTITY)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_progress_and_completion() {
        let state = Shared::default();
        let thumbnails = thumbnails();
        let runner = runner_for(&state, thumbnails.clone()).await;
        let task = TaskBuilder::new().with_id(3).assigned_to(5, "node-a-0").build();

        let script = "echo 'Fra:4 Mem:12M | Rendering'; echo \"Saved: '/out/0004.png'\"; \
                      echo 'missing texture' >&2";
        let outcome = runner.run(&task, &shell(script)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let state = state.lock().unwrap();
        let (id, last) = state.reports.last().unwrap();
        assert_eq!(*id, 3);
        assert_eq!(last.status, TaskStatus::Completed);

        let log = collected_log(&state);
        assert!(log.contains("Fra:4"));
        assert!(log.contains("missing texture"));

        let activity = last.activity.as_ref().unwrap();
        assert_eq!(activity.current_frame, Some(4));
        assert_eq!(activity.last_saved_path.as_deref(), Some("/out/0004.png"));
        assert_eq!(
            activity.thumbnail.as_deref(),
            Some("/farm/storage/thumbnail_3.png")
        );
        assert_eq!(thumbnails.calls.lock().unwrap().len(), 1);
        assert!(state
            .reports
            .iter()
            .all(|(_, r)| r.worker.as_deref() == Some("node-a-0")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_thumbnails_are_generated_off_the_runtime_thread() {
        let state = Shared::default();
        let thumbnails = thumbnails();
        let runner = runner_for(&state, thumbnails.clone()).await;
        let task = TaskBuilder::new().with_id(9).assigned_to(5, "node-a-0").build();

        let script = "echo \"Saved: '/out/0001.png'\"; echo \"Saved: '/out/0002.png'\"";
        let outcome = runner.run(&task, &shell(script)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let runtime_thread = std::thread::current().id();
        let threads = thumbnails.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_failure_exit_code() {
        let state = Shared::default();
        let runner = runner_for(&state, thumbnails()).await;
        let task = TaskBuilder::new().with_id(4).build();

        let outcome = runner.run(&task, &shell("echo boom; exit 3")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed { exit_code: Some(3) });

        let state = state.lock().unwrap();
        let (_, last) = state.reports.last().unwrap();
        assert_eq!(last.status, TaskStatus::Failed);
        assert!(collected_log(&state).contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejected_progress_kills_process() {
        let state = Shared::default();
        state.lock().unwrap().reject_progress = true;
        let runner = runner_for(&state, thumbnails()).await;
        let task = TaskBuilder::new().with_id(6).build();

        let started = std::time::Instant::now();
        let outcome = runner.run(&task, &shell("sleep 30")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Revoked);
        assert!(started.elapsed() < Duration::from_secs(5));

        let state = state.lock().unwrap();
        assert!(state
            .reports
            .iter()
            .all(|(_, r)| r.status == TaskStatus::Processing));
    }

    #[tokio::test]
    async fn test_unstartable_command_fails_task() {
        let state = Shared::default();
        let runner = runner_for(&state, thumbnails()).await;
        let task = TaskBuilder::new().with_id(7).build();

        let outcome = runner
            .run(&task, &CompiledCommand::new(["/no/such/renderer"]))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed { exit_code: None });

        let state = state.lock().unwrap();
        assert_eq!(state.reports.len(), 1);
        assert_eq!(state.reports[0].1.status, TaskStatus::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_service_executes_polled_exec_task() {
        let state = Shared::default();
        state.lock().unwrap().queue.push_back(
            TaskBuilder::new()
                .with_id(12)
                .with_job_id(2)
                .with_task_type("exec_command")
                .with_settings(json!({"command": "echo rendered"}))
                .assigned_to(5, "node-a-0")
                .build(),
        );
        let base = spawn_stub(state.clone()).await;
        let storage = tempfile::tempdir().unwrap();

        let config = ManagerConfig {
            name: "node-a".to_string(),
            server_url: base,
            storage_dir: storage.path().display().to_string(),
            progress_report_interval_ms: 50,
            ..Default::default()
        };
        let service = ManagerService::new(
            config,
            Arc::new(TaskCompilerRegistry::with_defaults()),
            thumbnails(),
        )
        .unwrap();

        assert!(service.work_once(5, "node-a-0").await);
        assert!(!service.work_once(5, "node-a-0").await);
        assert_eq!(service.usage().busy(), 0);
        assert!(storage.path().join("2").is_dir());

        let state = state.lock().unwrap();
        let (id, last) = state.reports.last().unwrap();
        assert_eq!(*id, 12);
        assert_eq!(last.status, TaskStatus::Completed);
        assert!(collected_log(&state).contains("rendered"));
    }

    #[tokio::test]
    async fn test_service_fails_uncompilable_task() {
        let state = Shared::default();
        state.lock().unwrap().queue.push_back(
            TaskBuilder::new()
                .with_id(13)
                .with_task_type("exec_command")
                .with_settings(json!({}))
                .build(),
        );
        let base = spawn_stub(state.clone()).await;
        let storage = tempfile::tempdir().unwrap();

        let service = ManagerService::new(
            ManagerConfig {
                server_url: base,
                storage_dir: storage.path().display().to_string(),
                ..Default::default()
            },
            Arc::new(TaskCompilerRegistry::with_defaults()),
            thumbnails(),
        )
        .unwrap();

        assert!(service.work_once(5, "w").await);
        let state = state.lock().unwrap();
        assert_eq!(state.reports[0].1.status, TaskStatus::Failed);
        assert!(state.reports[0].1.log.as_deref().unwrap().contains("command"));
    }
}
