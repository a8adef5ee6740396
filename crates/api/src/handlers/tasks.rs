use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use renderfarm_core::models::TaskStatusReport;
use renderfarm_dispatcher::{PollRequest, TaskDispatchService};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{no_content, success},
    routes::AppState,
};

/// 任务轮询参数
#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    pub manager_id: Option<i64>,
    pub worker: Option<String>,
    pub job_type: Option<String>,
}

impl From<PollQuery> for PollRequest {
    fn from(query: PollQuery) -> Self {
        let non_empty = |value: Option<String>| value.filter(|s| !s.trim().is_empty());
        PollRequest {
            manager_id: query.manager_id,
            worker: non_empty(query.worker),
            job_type: non_empty(query.job_type),
        }
    }
}

/// 轮询下一个可执行任务
///
/// 成功时直接返回任务文档（不带响应包装），没有可执行任务时返回 404。
pub async fn poll_task(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> ApiResult<impl IntoResponse> {
    let request = PollRequest::from(query);
    match state.dispatcher.next_task(&request).await? {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound("没有可执行的任务".to_string())),
    }
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.status.get(id).await?))
}

/// Manager上报任务状态
///
/// 转换有效时返回 204，无效时返回 422。
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(report): Json<TaskStatusReport>,
) -> ApiResult<impl IntoResponse> {
    state.status.report(id, &report).await?;
    Ok(no_content())
}
