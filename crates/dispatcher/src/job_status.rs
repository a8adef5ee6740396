use std::sync::Arc;

use renderfarm_core::{
    models::{JobStatus, TaskStatus},
    traits::{JobRepository, TaskRepository},
    FarmError, FarmResult,
};
use renderfarm_domain::{aggregate_job_status, JobStatusPolicy};
use tracing::{debug, info};

use crate::transitions::MAX_CAS_ATTEMPTS;

/// 根据任务状态重新计算并写回作业状态
///
/// 写回以读到的作业状态为前置条件。并发刷新抢先改写时重新读取任务并再算一次，
/// 较早读到的任务快照不会覆盖较新的结果。
pub struct JobStatusRefresher {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    policy: JobStatusPolicy,
}

impl JobStatusRefresher {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        policy: JobStatusPolicy,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            policy,
        }
    }

    pub fn policy(&self) -> &JobStatusPolicy {
        &self.policy
    }

    /// 作业已被删除时返回 `None`
    pub async fn refresh(&self, job_id: i64) -> FarmResult<Option<JobStatus>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(job) = self.job_repo.get_by_id(job_id).await? else {
                debug!("作业 {} 已不存在，跳过状态聚合", job_id);
                return Ok(None);
            };

            let statuses: Vec<TaskStatus> = self
                .task_repo
                .list_by_job(job_id)
                .await?
                .iter()
                .map(|task| task.status)
                .collect();
            let status = aggregate_job_status(&statuses, &self.policy);

            if status == job.status {
                return Ok(Some(status));
            }
            if self.job_repo.update_status(job_id, job.status, status).await? {
                info!("作业 {} 状态变更: {} -> {}", job_id, job.status, status);
                return Ok(Some(status));
            }
            debug!("作业 {} 状态并发变更，第 {} 次重新聚合", job_id, attempt);
        }

        Err(FarmError::DatabaseOperation(format!(
            "作业 {job_id} 状态聚合连续 {MAX_CAS_ATTEMPTS} 次条件更新失败"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use renderfarm_core::models::{Job, Task, TaskDraft};
    use renderfarm_testing_utils::{JobBuilder, MockFarmStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn drafts(count: usize) -> Vec<TaskDraft> {
        (0..count)
            .map(|i| TaskDraft {
                name: format!("t{i}"),
                task_type: "exec_command".to_string(),
                settings: json!({}),
                priority: 50,
                blocks: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_refresh_follows_task_states() {
        let store = MockFarmStore::new();
        let refresher = JobStatusRefresher::new(
            store.job_repository(),
            store.task_repository(),
            JobStatusPolicy::default(),
        );
        let (job, tasks) = store
            .create_with_tasks(&JobBuilder::new().build(), &drafts(2))
            .await
            .unwrap();

        assert_eq!(refresher.refresh(job.id).await.unwrap(), Some(JobStatus::Queued));

        store.force_task_status(tasks[0].id, TaskStatus::Completed);
        assert_eq!(refresher.refresh(job.id).await.unwrap(), Some(JobStatus::Active));
        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Active);

        store.force_task_status(tasks[1].id, TaskStatus::Completed);
        assert_eq!(
            refresher.refresh(job.id).await.unwrap(),
            Some(JobStatus::Completed)
        );
    }

    /// 第一次写回作业状态前，模拟另一个上报完成最后一个任务并抢先写回
    struct RacingJobs {
        store: MockFarmStore,
        last_task: i64,
        raced: AtomicBool,
    }

    #[async_trait]
    impl JobRepository for RacingJobs {
        async fn create_with_tasks(
            &self,
            job: &Job,
            drafts: &[TaskDraft],
        ) -> FarmResult<(Job, Vec<Task>)> {
            self.store.create_with_tasks(job, drafts).await
        }

        async fn get_by_id(&self, id: i64) -> FarmResult<Option<Job>> {
            JobRepository::get_by_id(&self.store, id).await
        }

        async fn list(&self) -> FarmResult<Vec<Job>> {
            JobRepository::list(&self.store).await
        }

        async fn update_status(
            &self,
            id: i64,
            expected: JobStatus,
            status: JobStatus,
        ) -> FarmResult<bool> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.store.force_task_status(self.last_task, TaskStatus::Completed);
                assert!(self
                    .store
                    .update_status(id, expected, JobStatus::Completed)
                    .await?);
            }
            self.store.update_status(id, expected, status).await
        }

        async fn delete(&self, id: i64) -> FarmResult<()> {
            JobRepository::delete(&self.store, id).await
        }
    }

    #[tokio::test]
    async fn test_stale_refresh_does_not_overwrite_newer_status() {
        let store = MockFarmStore::new();
        let (job, tasks) = store
            .create_with_tasks(&JobBuilder::new().build(), &drafts(2))
            .await
            .unwrap();
        store.force_task_status(tasks[0].id, TaskStatus::Completed);
        store.force_task_status(tasks[1].id, TaskStatus::Processing);

        let refresher = JobStatusRefresher::new(
            Arc::new(RacingJobs {
                store: store.clone(),
                last_task: tasks[1].id,
                raced: AtomicBool::new(false),
            }),
            store.task_repository(),
            JobStatusPolicy::default(),
        );

        assert_eq!(
            refresher.refresh(job.id).await.unwrap(),
            Some(JobStatus::Completed)
        );
        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_refresh_of_deleted_job_is_noop() {
        let store = MockFarmStore::new();
        let refresher = JobStatusRefresher::new(
            store.job_repository(),
            store.task_repository(),
            JobStatusPolicy::default(),
        );
        assert_eq!(refresher.refresh(99).await.unwrap(), None);
    }
}
