use std::sync::Arc;

use tracing::{info, instrument, warn};

use renderfarm_core::{
    models::{Job, JobStatus, NewJob, Task, TaskStatus},
    traits::{JobRepository, TaskRepository},
    FarmError, FarmResult,
};
use renderfarm_domain::JobCompilerRegistry;

use crate::transitions::{settle_task, MAX_CAS_ATTEMPTS};

/// 作业提交、查询、取消与删除
pub struct JobService {
    job_repo: Arc<dyn JobRepository>,
    task_repo: Arc<dyn TaskRepository>,
    compilers: Arc<JobCompilerRegistry>,
}

impl JobService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_repo: Arc<dyn TaskRepository>,
        compilers: Arc<JobCompilerRegistry>,
    ) -> Self {
        Self {
            job_repo,
            task_repo,
            compilers,
        }
    }

    /// 提交作业
    ///
    /// 先分解再写库：设置错误时不会写入任何记录。
    #[instrument(skip(self, new_job), fields(job_type = %new_job.job_type))]
    pub async fn submit(&self, new_job: NewJob) -> FarmResult<(Job, Vec<Task>)> {
        let job = Job::from_submission(new_job);
        let drafts = self.compilers.compile(&job).inspect_err(|e| {
            warn!("作业 {} 被拒绝: {}", job.name, e);
        })?;

        let (job, tasks) = self.job_repo.create_with_tasks(&job, &drafts).await?;
        info!(
            "作业 {} ({}) 已提交，分解为 {} 个任务",
            job.id,
            job.job_type,
            tasks.len()
        );
        Ok((job, tasks))
    }

    pub async fn get(&self, job_id: i64) -> FarmResult<(Job, Vec<Task>)> {
        let job = self.require_job(job_id).await?;
        let tasks = self.task_repo.list_by_job(job_id).await?;
        Ok((job, tasks))
    }

    pub async fn list(&self) -> FarmResult<Vec<Job>> {
        self.job_repo.list().await
    }

    pub async fn tasks_of(&self, job_id: i64) -> FarmResult<Vec<Task>> {
        self.require_job(job_id).await?;
        self.task_repo.list_by_job(job_id).await
    }

    /// 删除作业
    ///
    /// 尚未结束的任务先转为 aborted，持有它们的Manager在下一次上报时会收到拒绝。
    /// 返回被中止的任务ID。
    #[instrument(skip(self))]
    pub async fn delete(&self, job_id: i64) -> FarmResult<Vec<i64>> {
        self.require_job(job_id).await?;

        let mut aborted = Vec::new();
        for task in self.task_repo.list_by_job(job_id).await? {
            if task.is_final() {
                continue;
            }
            if settle_task(
                self.task_repo.as_ref(),
                &task,
                TaskStatus::Aborted,
                "作业已删除，任务中止\n",
            )
            .await?
            {
                aborted.push(task.id);
            }
        }

        self.job_repo.delete(job_id).await?;
        info!("作业 {} 已删除，中止了 {} 个任务", job_id, aborted.len());
        Ok(aborted)
    }

    /// 取消作业：排队和处理中的任务转为 canceled
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: i64) -> FarmResult<Job> {
        let job = self.require_job(job_id).await?;
        if job.status == JobStatus::Canceled {
            return Ok(job);
        }

        let mut canceled = 0;
        for task in self.task_repo.list_by_job(job_id).await? {
            if task.is_final() {
                continue;
            }
            if settle_task(
                self.task_repo.as_ref(),
                &task,
                TaskStatus::Canceled,
                "作业已取消\n",
            )
            .await?
            {
                canceled += 1;
            }
        }

        let job = self.mark_canceled(job_id).await?;
        info!("作业 {} 已取消，取消了 {} 个任务", job_id, canceled);
        Ok(job)
    }

    /// 以读到的作业状态为前置条件写入 canceled
    ///
    /// 取消前全部任务都已完成时作业保持 completed。
    async fn mark_canceled(&self, job_id: i64) -> FarmResult<Job> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let job = self.require_job(job_id).await?;
            let tasks = self.task_repo.list_by_job(job_id).await?;
            let target = if !tasks.is_empty()
                && tasks.iter().all(|t| t.status == TaskStatus::Completed)
            {
                JobStatus::Completed
            } else {
                JobStatus::Canceled
            };

            if job.status == target
                || self.job_repo.update_status(job_id, job.status, target).await?
            {
                return self.require_job(job_id).await;
            }
        }

        Err(FarmError::DatabaseOperation(format!(
            "作业 {job_id} 取消时连续 {MAX_CAS_ATTEMPTS} 次条件更新失败"
        )))
    }

    async fn require_job(&self, job_id: i64) -> FarmResult<Job> {
        self.job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(FarmError::JobNotFound { id: job_id })
    }
}
