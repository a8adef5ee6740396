use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use renderfarm_core::{
    models::{Task, TaskStatus, TaskStatusReport, TaskUpdate},
    traits::TaskRepository,
    FarmError, FarmResult,
};
use renderfarm_domain::validate_report_transition;

use crate::job_status::JobStatusRefresher;
use crate::transitions::MAX_CAS_ATTEMPTS;

/// 处理Manager上报的任务状态
///
/// 每次上报都先按当前状态校验转换，再以当前状态和持有者为前置条件做条件更新。
/// 条件更新失败说明任务已被并发修改，重新读取后再校验一次。
/// 上报不能让 queued 任务进入 processing，带 `worker` 的上报必须来自当前持有者。
pub struct TaskStatusService {
    task_repo: Arc<dyn TaskRepository>,
    job_status: Arc<JobStatusRefresher>,
}

impl TaskStatusService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, job_status: Arc<JobStatusRefresher>) -> Self {
        Self {
            task_repo,
            job_status,
        }
    }

    pub async fn get(&self, task_id: i64) -> FarmResult<Task> {
        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(FarmError::TaskNotFound { id: task_id })
    }

    #[instrument(skip(self, report), fields(task_id = %task_id, status = %report.status))]
    pub async fn report(&self, task_id: i64, report: &TaskStatusReport) -> FarmResult<Task> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let task = self.get(task_id).await?;
            validate_report_transition(task.id, task.status, report.status)?;
            if let Some(worker) = report.worker.as_deref() {
                if task.worker.as_deref() != Some(worker) {
                    return Err(FarmError::NotTaskHolder {
                        id: task.id,
                        worker: worker.to_string(),
                    });
                }
            }

            let mut update = TaskUpdate::status(report.status).held_by(task.worker.clone());
            if let Some(activity) = &report.activity {
                update = update.with_activity(activity.clone());
            }
            if let Some(log) = report.log.as_deref().filter(|l| !l.is_empty()) {
                update = update.with_log(log);
            }
            if report.status == TaskStatus::Queued {
                update = update.clearing_assignment();
            }

            if !self
                .task_repo
                .update_if_status(task.id, task.status, &update)
                .await?
            {
                debug!("任务 {} 状态并发变更，第 {} 次重新校验", task_id, attempt);
                continue;
            }

            if task.status != report.status {
                info!("任务 {} 状态变更: {} -> {}", task_id, task.status, report.status);
                if let Err(e) = self.job_status.refresh(task.job_id).await {
                    warn!("刷新作业 {} 状态失败: {}", task.job_id, e);
                }
            }
            return self.get(task_id).await;
        }

        Err(FarmError::DatabaseOperation(format!(
            "任务 {task_id} 状态上报连续 {MAX_CAS_ATTEMPTS} 次条件更新失败"
        )))
    }
}
