use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use renderfarm_core::models::{Job, NewJob, Task};
use serde::Serialize;

use crate::{
    error::ApiResult,
    response::{created, success, success_with_message},
    routes::AppState,
};

/// 作业及其全部任务
#[derive(Debug, Serialize)]
pub struct JobDetail {
    pub job: Job,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct DeletedJob {
    pub job_id: i64,
    pub aborted_task_ids: Vec<i64>,
}

/// 提交作业
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<NewJob>,
) -> ApiResult<impl IntoResponse> {
    let (job, tasks) = state.jobs.submit(request).await?;
    Ok(created(JobDetail { job, tasks }))
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.jobs.list().await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let (job, tasks) = state.jobs.get(id).await?;
    Ok(success(JobDetail { job, tasks }))
}

/// 删除作业，未结束的任务先被中止
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let aborted_task_ids = state.jobs.delete(id).await?;
    let message = format!("作业 {id} 已删除");
    Ok(success_with_message(
        DeletedJob {
            job_id: id,
            aborted_task_ids,
        },
        message,
    ))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.jobs.cancel(id).await?))
}
