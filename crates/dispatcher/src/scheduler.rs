use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use renderfarm_core::{
    config::DispatcherConfig,
    models::{DispatchFilter, ManagerStatus, Task, TaskAssignment},
    traits::{ManagerRepository, TaskRepository},
    FarmError, FarmResult,
};

use crate::job_status::JobStatusRefresher;

/// 一次任务轮询请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollRequest {
    pub manager_id: Option<i64>,
    pub worker: Option<String>,
    /// 与作业类型或任务类型匹配
    pub job_type: Option<String>,
}

/// 任务派发服务接口
#[async_trait]
pub trait TaskDispatchService: Send + Sync {
    /// 为请求方选出并原子领取下一个可执行任务，没有可执行任务时返回 `None`
    async fn next_task(&self, request: &PollRequest) -> FarmResult<Option<Task>>;
}

/// 任务调度器
///
/// 选择与领取分两步：先查询一批按优先级排序的候选，再逐个用条件更新领取。
/// 领取失败说明任务被其他轮询方抢先，继续尝试下一个候选；整批都失败时
/// 重新查询，最多 `claim_retry_limit` 轮。
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    manager_repo: Arc<dyn ManagerRepository>,
    job_status: Arc<JobStatusRefresher>,
    config: DispatcherConfig,
}

impl TaskScheduler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        manager_repo: Arc<dyn ManagerRepository>,
        job_status: Arc<JobStatusRefresher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            task_repo,
            manager_repo,
            job_status,
            config,
        }
    }

    /// 记录轮询方的存活证明，返回是否允许向其派发
    async fn admit_manager(&self, manager_id: i64) -> FarmResult<bool> {
        let manager = self
            .manager_repo
            .get_by_id(manager_id)
            .await?
            .ok_or(FarmError::ManagerNotFound { id: manager_id })?;

        // 离线标记由存活探测负责清除
        if self.config.skip_offline_managers && manager.status == ManagerStatus::Offline {
            debug!("Manager {} 已被标记为离线，不派发任务", manager.name);
            return Ok(false);
        }

        self.manager_repo.touch(manager_id, Utc::now()).await?;
        Ok(true)
    }

    async fn claim_from_batch(
        &self,
        candidates: &[Task],
        assignment: &TaskAssignment,
    ) -> FarmResult<Option<Task>> {
        for candidate in candidates {
            if !self.task_repo.try_claim(candidate.id, assignment).await? {
                let conflict = FarmError::SchedulingConflict { id: candidate.id };
                debug!("{}", conflict);
                continue;
            }

            let Some(claimed) = self.task_repo.get_by_id(candidate.id).await? else {
                warn!("任务 {} 领取后被删除", candidate.id);
                continue;
            };

            if let Err(e) = self.job_status.refresh(claimed.job_id).await {
                warn!("领取任务后刷新作业 {} 状态失败: {}", claimed.job_id, e);
            }
            return Ok(Some(claimed));
        }
        Ok(None)
    }
}

#[async_trait]
impl TaskDispatchService for TaskScheduler {
    #[instrument(skip(self), fields(
        manager_id = ?request.manager_id,
        worker = ?request.worker,
        job_type = ?request.job_type,
    ))]
    async fn next_task(&self, request: &PollRequest) -> FarmResult<Option<Task>> {
        if let Some(manager_id) = request.manager_id {
            if !self.admit_manager(manager_id).await? {
                return Ok(None);
            }
        }

        let filter = DispatchFilter {
            job_type: request.job_type.clone(),
            limit: i64::from(self.config.candidate_batch_size),
        };
        let assignment = TaskAssignment {
            manager_id: request.manager_id,
            worker: request.worker.clone(),
        };

        for round in 1..=self.config.claim_retry_limit.max(1) {
            let candidates = self.task_repo.find_dispatchable(&filter).await?;
            if candidates.is_empty() {
                debug!("没有可派发的任务");
                return Ok(None);
            }

            if let Some(task) = self.claim_from_batch(&candidates, &assignment).await? {
                info!(
                    "派发任务 {} ({}) 给 {}",
                    task.id,
                    task.name,
                    request.worker.as_deref().unwrap_or("匿名Worker")
                );
                return Ok(Some(task));
            }

            debug!("第 {} 轮候选任务全部被抢先领取，重新查询", round);
        }

        warn!(
            "连续 {} 轮领取冲突，本次轮询不派发任务",
            self.config.claim_retry_limit
        );
        Ok(None)
    }
}
