use async_trait::async_trait;
use chrono::Utc;
use renderfarm_core::{
    models::{Job, JobStatus, Task, TaskDraft, TaskStatus},
    traits::JobRepository,
    FarmError, FarmResult,
};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::connect_embedded;
use crate::database::mapping::{row_to_job, row_to_task, JOB_COLUMNS, TASK_COLUMNS};
use crate::repo_context;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建嵌入式SQLite作业仓库，自动初始化数据库
    pub async fn new_embedded(database_path: &str) -> FarmResult<Self> {
        Ok(Self::new(connect_embedded(database_path).await?))
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job, drafts), fields(
        job_name = %job.name,
        job_type = %job.job_type,
        task_count = drafts.len(),
    ))]
    async fn create_with_tasks(
        &self,
        job: &Job,
        drafts: &[TaskDraft],
    ) -> FarmResult<(Job, Vec<Task>)> {
        let context = repo_context!(Create, Job)
            .with_additional_info(format!("{} 个任务", drafts.len()));
        let now = Utc::now();

        // 事务在提前返回时被丢弃并回滚，不会留下孤立任务
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| context.database_error(e))?;

        let sql = format!(
            r#"
            INSERT INTO jobs (name, job_type, priority, settings, status, project_id, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&job.name)
            .bind(&job.job_type)
            .bind(job.priority)
            .bind(serde_json::to_string(&job.settings)?)
            .bind(JobStatus::Queued)
            .bind(job.project_id)
            .bind(job.user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| context.database_error(e))?;
        let created_job = row_to_job(&row)?;

        let mut task_ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO tasks (job_id, name, task_type, settings, priority, status, log, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, '', $7, $7)
                RETURNING id
                "#,
            )
            .bind(created_job.id)
            .bind(&draft.name)
            .bind(&draft.task_type)
            .bind(serde_json::to_string(&draft.settings)?)
            .bind(draft.priority)
            .bind(TaskStatus::Queued)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| context.database_error(e))?;
            task_ids.push(id);
        }

        // 草稿下标换算为数据库ID
        for (index, draft) in drafts.iter().enumerate() {
            let Some(target) = draft.blocks else {
                continue;
            };
            let target_id = task_ids.get(target).ok_or_else(|| {
                FarmError::Internal(format!("任务草稿 {index} 的依赖指针无效: {target}"))
            })?;
            sqlx::query("UPDATE tasks SET blocks_task_id = $1 WHERE id = $2")
                .bind(target_id)
                .bind(task_ids[index])
                .execute(&mut *tx)
                .await
                .map_err(|e| context.database_error(e))?;
        }

        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(created_job.id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| context.database_error(e))?;
        let tasks = rows.iter().map(row_to_task).collect::<FarmResult<Vec<_>>>()?;

        tx.commit().await.map_err(|e| context.database_error(e))?;

        context.with_id(created_job.id).log_success(Some(&format!(
            "类型: {}, 任务数: {}",
            created_job.job_type,
            tasks.len()
        )));
        Ok((created_job, tasks))
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Job>> {
        let context = repo_context!(Read, Job, id = id);
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => {
                debug!("查询作业不存在: ID {}", id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self) -> FarmResult<Vec<Job>> {
        let context = repo_context!(Query, Job);
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;
        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self), fields(job_id = %id, status = %status))]
    async fn update_status(
        &self,
        id: i64,
        expected: JobStatus,
        status: JobStatus,
    ) -> FarmResult<bool> {
        let context = repo_context!(Update, Job, id = id);
        let result = sqlx::query(
            "UPDATE jobs SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        let applied = result.rows_affected() == 1;
        if applied {
            context.log_success(Some(&format!("状态: {expected} -> {status}")));
        }
        Ok(applied)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn delete(&self, id: i64) -> FarmResult<()> {
        let context = repo_context!(Delete, Job, id = id);
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;

        if result.rows_affected() == 0 {
            return Err(context.not_found());
        }
        context.log_success(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use renderfarm_core::models::NewJob;
    use serde_json::json;

    fn new_job() -> Job {
        Job::from_submission(NewJob {
            name: "shot_010".to_string(),
            job_type: "tiled_blender_render".to_string(),
            priority: 40,
            settings: json!({"filepath": "a.blend"}),
            project_id: Some(2),
            user_id: None,
        })
    }

    fn draft(name: &str, blocks: Option<usize>) -> TaskDraft {
        TaskDraft {
            name: name.to_string(),
            task_type: "tiled_blender_render".to_string(),
            settings: json!({"tile": name}),
            priority: 40,
            blocks,
        }
    }

    #[tokio::test]
    async fn test_create_with_tasks_maps_dependency_pointers() {
        let (pool, _dir) = setup_test_db().await;
        let repo = SqliteJobRepository::new(pool);

        let drafts = vec![draft("Mixing", None), draft("Tile 0", Some(0)), draft("Tile 1", Some(0))];
        let (job, tasks) = repo.create_with_tasks(&new_job(), &drafts).await.unwrap();

        assert!(job.id > 0);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.project_id, Some(2));
        assert_eq!(tasks.len(), 3);
        let mix_id = tasks[0].id;
        assert_eq!(tasks[0].blocks_task_id, None);
        assert_eq!(tasks[1].blocks_task_id, Some(mix_id));
        assert_eq!(tasks[2].blocks_task_id, Some(mix_id));
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued && t.job_id == job.id));
    }

    #[tokio::test]
    async fn test_invalid_pointer_rolls_back_everything() {
        let (pool, _dir) = setup_test_db().await;
        let repo = SqliteJobRepository::new(pool.clone());

        let drafts = vec![draft("Tile 0", Some(5))];
        assert!(repo.create_with_tasks(&new_job(), &drafts).await.is_err());

        assert!(repo.list().await.unwrap().is_empty());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_tasks() {
        let (pool, _dir) = setup_test_db().await;
        let repo = SqliteJobRepository::new(pool.clone());
        let (job, _) = repo
            .create_with_tasks(&new_job(), &[draft("Mixing", None)])
            .await
            .unwrap();

        repo.delete(job.id).await.unwrap();

        assert!(repo.get_by_id(job.id).await.unwrap().is_none());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(
            repo.delete(job.id).await,
            Err(FarmError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_and_list() {
        let (pool, _dir) = setup_test_db().await;
        let repo = SqliteJobRepository::new(pool);
        let (first, _) = repo.create_with_tasks(&new_job(), &[]).await.unwrap();
        let (second, _) = repo.create_with_tasks(&new_job(), &[]).await.unwrap();

        assert!(repo
            .update_status(first.id, JobStatus::Queued, JobStatus::Active)
            .await
            .unwrap());
        // 期望状态已过时
        assert!(!repo
            .update_status(first.id, JobStatus::Queued, JobStatus::Completed)
            .await
            .unwrap());

        let jobs = repo.list().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, second.id);
        assert_eq!(jobs[1].status, JobStatus::Active);
        assert!(!repo
            .update_status(999, JobStatus::Queued, JobStatus::Failed)
            .await
            .unwrap());
    }
}
