use async_trait::async_trait;
use chrono::Utc;
use renderfarm_core::{
    models::{DispatchFilter, Task, TaskAssignment, TaskStatus, TaskUpdate},
    traits::TaskRepository,
    FarmResult,
};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::connect_embedded;
use crate::database::mapping::{row_to_task, TASK_COLUMNS};
use crate::repo_context;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建嵌入式SQLite任务仓库，自动初始化数据库
    pub async fn new_embedded(database_path: &str) -> FarmResult<Self> {
        Ok(Self::new(connect_embedded(database_path).await?))
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Task>> {
        let context = repo_context!(Read, Task, id = id);
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;

        match row {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => {
                debug!("查询任务不存在: ID {}", id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn list_by_job(&self, job_id: i64) -> FarmResult<Vec<Task>> {
        let context = repo_context!(Query, Task).with_additional_info(format!("作业 {job_id}"));
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;
        rows.iter().map(row_to_task).collect()
    }

    #[instrument(skip(self, filter), fields(
        job_type = ?filter.job_type,
        limit = filter.limit,
    ))]
    async fn find_dispatchable(&self, filter: &DispatchFilter) -> FarmResult<Vec<Task>> {
        let context = repo_context!(Query, Task).with_additional_info(format!("过滤器: {filter:?}"));

        // 指向本任务的上游任务全部完成后，本任务才有资格被派发
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM tasks t
            JOIN jobs j ON j.id = t.job_id
            WHERE t.status = 'queued'
              AND j.status IN ('queued', 'active')
              AND ($1 IS NULL OR j.job_type = $1 OR t.task_type = $1)
              AND NOT EXISTS (
                  SELECT 1 FROM tasks u
                  WHERE u.blocks_task_id = t.id AND u.status != 'completed'
              )
            ORDER BY t.priority DESC, t.created_at ASC, t.id ASC
            LIMIT $2
            "#,
        )
        .bind(filter.job_type.as_deref())
        .bind(filter.limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        let tasks = rows.iter().map(row_to_task).collect::<FarmResult<Vec<_>>>()?;
        debug!("找到 {} 个可派发任务候选", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self, assignment), fields(
        task_id = %id,
        manager_id = ?assignment.manager_id,
        worker = ?assignment.worker,
    ))]
    async fn try_claim(&self, id: i64, assignment: &TaskAssignment) -> FarmResult<bool> {
        let context = repo_context!(Claim, Task, id = id);
        let now = Utc::now();

        // 选择与领取由同一条条件更新完成
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, manager_id = $3, worker = $4, updated_at = $5, last_activity_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(id)
        .bind(TaskStatus::Processing)
        .bind(assignment.manager_id)
        .bind(assignment.worker.as_deref())
        .bind(now)
        .bind(TaskStatus::Queued)
        .execute(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        let claimed = result.rows_affected() == 1;
        if claimed {
            context.log_success(assignment.worker.as_deref());
        } else {
            debug!("任务 {} 已被其他轮询方领取", id);
        }
        Ok(claimed)
    }

    #[instrument(skip(self, update), fields(
        task_id = %id,
        expected = %expected,
        status = %update.status,
    ))]
    async fn update_if_status(
        &self,
        id: i64,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> FarmResult<bool> {
        let context = repo_context!(Update, Task, id = id);
        let now = Utc::now();

        let activity_json = update
            .activity
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3,
                activity = COALESCE($4, activity),
                log = log || COALESCE($5, ''),
                manager_id = CASE WHEN $6 THEN NULL ELSE manager_id END,
                worker = CASE WHEN $6 THEN NULL ELSE worker END,
                updated_at = $7,
                last_activity_at = $7
            WHERE id = $1 AND status = $2
              AND ($8 = 0 OR worker IS $9)
              AND ($10 = 0 OR last_activity_at IS $11)
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(update.status)
        .bind(activity_json)
        .bind(update.log_append.as_deref())
        .bind(update.clear_assignment)
        .bind(now)
        .bind(update.expected_worker.is_some())
        .bind(update.expected_worker.clone().flatten())
        .bind(update.expected_activity_at.is_some())
        .bind(update.expected_activity_at.flatten())
        .execute(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        let applied = result.rows_affected() == 1;
        if applied {
            context.log_success(Some(&format!("{expected} -> {}", update.status)));
        }
        Ok(applied)
    }

    #[instrument(skip(self))]
    async fn list_processing(&self) -> FarmResult<Vec<Task>> {
        let context = repo_context!(Query, Task);
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY last_activity_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(TaskStatus::Processing)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;
        rows.iter().map(row_to_task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::super::SqliteJobRepository;
    use super::*;
    use renderfarm_core::models::{Job, JobStatus, NewJob, TaskActivity, TaskDraft};
    use renderfarm_core::traits::JobRepository;
    use serde_json::json;
    use std::sync::Arc;

    fn job(job_type: &str, priority: i32) -> Job {
        Job::from_submission(NewJob {
            name: format!("{job_type}-{priority}"),
            job_type: job_type.to_string(),
            priority,
            settings: json!({}),
            project_id: None,
            user_id: None,
        })
    }

    fn draft(name: &str, task_type: &str, priority: i32, blocks: Option<usize>) -> TaskDraft {
        TaskDraft {
            name: name.to_string(),
            task_type: task_type.to_string(),
            settings: json!({}),
            priority,
            blocks,
        }
    }

    fn filter() -> DispatchFilter {
        DispatchFilter {
            job_type: None,
            limit: 10,
        }
    }

    fn assignment(worker: &str) -> TaskAssignment {
        TaskAssignment {
            manager_id: Some(1),
            worker: Some(worker.to_string()),
        }
    }

    #[tokio::test]
    async fn test_dispatch_order_priority_then_age() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);

        let (_, low) = jobs
            .create_with_tasks(&job("exec_command", 10), &[draft("low", "exec_command", 10, None)])
            .await
            .unwrap();
        let (_, high) = jobs
            .create_with_tasks(
                &job("exec_command", 90),
                &[
                    draft("high-a", "exec_command", 90, None),
                    draft("high-b", "exec_command", 90, None),
                ],
            )
            .await
            .unwrap();

        let candidates = tasks.find_dispatchable(&filter()).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high[0].id, high[1].id, low[0].id]);
    }

    #[tokio::test]
    async fn test_job_type_filter_matches_job_or_task_type() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);

        jobs.create_with_tasks(
            &job("tiled_blender_render", 50),
            &[
                draft("Mixing", "tiled_blender_render_simple_mix", 50, None),
                draft("Tile 0", "tiled_blender_render", 50, Some(0)),
            ],
        )
        .await
        .unwrap();
        jobs.create_with_tasks(&job("exec_command", 50), &[draft("x", "exec_command", 50, None)])
            .await
            .unwrap();

        let by_job = tasks
            .find_dispatchable(&DispatchFilter {
                job_type: Some("tiled_blender_render".to_string()),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(by_job.len(), 1);
        assert_eq!(by_job[0].name, "Tile 0");

        let none = tasks
            .find_dispatchable(&DispatchFilter {
                job_type: Some("blender_opengl_render".to_string()),
                limit: 10,
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_mix_is_gated_until_every_tile_completes() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);

        let (_, created) = jobs
            .create_with_tasks(
                &job("tiled_blender_render", 50),
                &[
                    draft("Mixing", "tiled_blender_render_simple_mix", 50, None),
                    draft("Tile 0", "tiled_blender_render", 50, Some(0)),
                    draft("Tile 1", "tiled_blender_render", 50, Some(0)),
                ],
            )
            .await
            .unwrap();
        let mix_id = created[0].id;

        let eligible = tasks.find_dispatchable(&filter()).await.unwrap();
        assert!(eligible.iter().all(|t| t.id != mix_id));
        assert_eq!(eligible.len(), 2);

        for tile in &created[1..] {
            assert!(tasks.try_claim(tile.id, &assignment("w1")).await.unwrap());
            let done = TaskUpdate::status(TaskStatus::Completed);
            assert!(tasks
                .update_if_status(tile.id, TaskStatus::Processing, &done)
                .await
                .unwrap());

            let eligible = tasks.find_dispatchable(&filter()).await.unwrap();
            let mix_visible = eligible.iter().any(|t| t.id == mix_id);
            assert_eq!(mix_visible, tile.id == created[2].id);
        }
    }

    #[tokio::test]
    async fn test_inactive_jobs_are_not_dispatched() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);

        let (created, _) = jobs
            .create_with_tasks(&job("exec_command", 50), &[draft("x", "exec_command", 50, None)])
            .await
            .unwrap();
        jobs.update_status(created.id, JobStatus::Queued, JobStatus::Canceled)
            .await
            .unwrap();

        assert!(tasks.find_dispatchable(&filter()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);
        let (_, created) = jobs
            .create_with_tasks(&job("exec_command", 50), &[draft("x", "exec_command", 50, None)])
            .await
            .unwrap();
        let id = created[0].id;

        assert!(tasks.try_claim(id, &assignment("w1")).await.unwrap());
        assert!(!tasks.try_claim(id, &assignment("w2")).await.unwrap());

        let task = tasks.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.worker.as_deref(), Some("w1"));
        assert!(task.last_activity_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_duplicate() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = Arc::new(SqliteTaskRepository::new(pool));
        let (_, created) = jobs
            .create_with_tasks(
                &job("exec_command", 50),
                &(0..5)
                    .map(|i| draft(&format!("t{i}"), "exec_command", 50, None))
                    .collect::<Vec<_>>(),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for worker in 0..10 {
            let tasks = tasks.clone();
            let ids: Vec<i64> = created.iter().map(|t| t.id).collect();
            handles.push(tokio::spawn(async move {
                let mut won = Vec::new();
                for id in ids {
                    if tasks
                        .try_claim(id, &assignment(&format!("w{worker}")))
                        .await
                        .unwrap()
                    {
                        won.push(id);
                    }
                }
                won
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }
        claimed.sort_unstable();
        let expected: Vec<i64> = created.iter().map(|t| t.id).collect();
        assert_eq!(claimed, expected);
    }

    #[tokio::test]
    async fn test_update_if_status_appends_log_and_requeues() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);
        let (_, created) = jobs
            .create_with_tasks(&job("exec_command", 50), &[draft("x", "exec_command", 50, None)])
            .await
            .unwrap();
        let id = created[0].id;
        tasks.try_claim(id, &assignment("w1")).await.unwrap();

        let progress = TaskUpdate::status(TaskStatus::Processing)
            .with_activity(TaskActivity {
                current_frame: Some(12),
                ..Default::default()
            })
            .with_log("Fra:12\n");
        assert!(tasks
            .update_if_status(id, TaskStatus::Processing, &progress)
            .await
            .unwrap());
        assert_eq!(tasks.list_processing().await.unwrap().len(), 1);

        // 期望状态不符时不生效
        let stale = TaskUpdate::status(TaskStatus::Completed);
        assert!(!tasks
            .update_if_status(id, TaskStatus::Queued, &stale)
            .await
            .unwrap());

        let requeue = TaskUpdate::status(TaskStatus::Queued)
            .with_log("requeued\n")
            .clearing_assignment();
        assert!(tasks
            .update_if_status(id, TaskStatus::Processing, &requeue)
            .await
            .unwrap());

        let task = tasks.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.log, "Fra:12\nrequeued\n");
        assert_eq!(task.activity.current_frame, Some(12));
        assert_eq!(task.worker, None);
        assert_eq!(task.manager_id, None);
        assert!(tasks.list_processing().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guarded_update_checks_holder_and_activity() {
        let (pool, _dir) = setup_test_db().await;
        let jobs = SqliteJobRepository::new(pool.clone());
        let tasks = SqliteTaskRepository::new(pool);
        let (_, created) = jobs
            .create_with_tasks(&job("exec_command", 50), &[draft("x", "exec_command", 50, None)])
            .await
            .unwrap();
        let id = created[0].id;
        tasks.try_claim(id, &assignment("w1")).await.unwrap();
        let observed = tasks.get_by_id(id).await.unwrap().unwrap();

        let foreign = TaskUpdate::status(TaskStatus::Processing).held_by(Some("w2".to_string()));
        assert!(!tasks
            .update_if_status(id, TaskStatus::Processing, &foreign)
            .await
            .unwrap());

        let progress = TaskUpdate::status(TaskStatus::Processing).held_by(observed.worker.clone());
        assert!(tasks
            .update_if_status(id, TaskStatus::Processing, &progress)
            .await
            .unwrap());

        // 观察之后有过上报，基于旧观察的重新排队不生效
        let requeue = TaskUpdate::status(TaskStatus::Queued)
            .clearing_assignment()
            .held_by(observed.worker.clone())
            .unchanged_since(observed.last_activity_at);
        assert!(!tasks
            .update_if_status(id, TaskStatus::Processing, &requeue)
            .await
            .unwrap());

        let fresh = tasks.get_by_id(id).await.unwrap().unwrap();
        let requeue = requeue.unchanged_since(fresh.last_activity_at);
        assert!(tasks
            .update_if_status(id, TaskStatus::Processing, &requeue)
            .await
            .unwrap());
        assert_eq!(
            tasks.get_by_id(id).await.unwrap().unwrap().status,
            TaskStatus::Queued
        );
    }
}
