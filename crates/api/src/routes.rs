use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use renderfarm_core::config::DispatcherConfig;
use renderfarm_core::traits::{JobRepository, ManagerRepository, TaskRepository};
use renderfarm_dispatcher::{
    JobService, JobStatusRefresher, TaskDispatchService, TaskScheduler, TaskStatusService,
};
use renderfarm_domain::{JobCompilerRegistry, JobStatusPolicy};

use crate::handlers::{
    health::health_check,
    jobs::{cancel_job, create_job, delete_job, get_job, list_jobs},
    managers::{list_managers, register_manager},
    tasks::{get_task, poll_task, update_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub dispatcher: Arc<dyn TaskDispatchService>,
    pub status: Arc<TaskStatusService>,
    pub managers: Arc<dyn ManagerRepository>,
}

impl AppState {
    /// 由仓储与调度配置装配全部服务
    pub fn assemble(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        manager_repo: Arc<dyn ManagerRepository>,
        compilers: Arc<JobCompilerRegistry>,
        config: &DispatcherConfig,
    ) -> Self {
        let refresher = Arc::new(JobStatusRefresher::new(
            job_repo.clone(),
            task_repo.clone(),
            JobStatusPolicy::new(config.job_failure_threshold as usize),
        ));

        Self {
            jobs: Arc::new(JobService::new(job_repo, task_repo.clone(), compilers)),
            dispatcher: Arc::new(TaskScheduler::new(
                task_repo.clone(),
                manager_repo.clone(),
                refresher.clone(),
                config.clone(),
            )),
            status: Arc::new(TaskStatusService::new(task_repo, refresher)),
            managers: manager_repo,
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 作业
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/{id}", get(get_job).delete(delete_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        // 任务轮询与状态上报
        .route("/api/tasks", get(poll_task))
        .route("/api/tasks/{id}", get(get_task).patch(update_task))
        // Manager
        .route("/api/managers", get(list_managers).post(register_manager))
        .with_state(state)
}
