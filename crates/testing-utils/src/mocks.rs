//! 仓储接口的内存实现
//!
//! 三个仓储共享同一份状态，这样派发查询可以像数据库连接查询一样
//! 同时看到作业状态与任务依赖。所有条件更新都在同一把锁内完成。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renderfarm_core::models::{
    DispatchFilter, Job, JobStatus, Manager, ManagerRegistration, ManagerStatus, Task,
    TaskAssignment, TaskDraft, TaskStatus, TaskUpdate,
};
use renderfarm_core::traits::{JobRepository, ManagerRepository, TaskRepository};
use renderfarm_core::{FarmError, FarmResult};

#[derive(Debug, Default)]
struct StoreState {
    jobs: BTreeMap<i64, Job>,
    tasks: BTreeMap<i64, Task>,
    managers: BTreeMap<i64, Manager>,
    next_job_id: i64,
    next_task_id: i64,
    next_manager_id: i64,
    /// 接下来这么多次领取会被"其他轮询方"抢先
    stolen_claims: usize,
    claim_attempts: usize,
}

/// 内存中的作业、任务与Manager存储
#[derive(Debug, Clone, Default)]
pub struct MockFarmStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockFarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(self.clone())
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(self.clone())
    }

    pub fn manager_repository(&self) -> Arc<dyn ManagerRepository> {
        Arc::new(self.clone())
    }

    /// 直接写入任务，用于构造任意状态
    pub fn insert_task(&self, task: Task) {
        let mut state = self.lock();
        state.next_task_id = state.next_task_id.max(task.id);
        state.tasks.insert(task.id, task);
    }

    pub fn insert_job(&self, job: Job) {
        let mut state = self.lock();
        state.next_job_id = state.next_job_id.max(job.id);
        state.jobs.insert(job.id, job);
    }

    pub fn insert_manager(&self, manager: Manager) {
        let mut state = self.lock();
        state.next_manager_id = state.next_manager_id.max(manager.id);
        state.managers.insert(manager.id, manager);
    }

    /// 让接下来的 `count` 次领取失败，且被领取的任务转为 processing
    pub fn steal_next_claims(&self, count: usize) {
        self.lock().stolen_claims = count;
    }

    pub fn claim_attempts(&self) -> usize {
        self.lock().claim_attempts
    }

    pub fn task(&self, id: i64) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    pub fn job(&self, id: i64) -> Option<Job> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// 强制修改任务状态，绕过条件更新
    pub fn force_task_status(&self, id: i64, status: TaskStatus) {
        if let Some(task) = self.lock().tasks.get_mut(&id) {
            task.status = status;
        }
    }

    pub fn set_last_activity(&self, id: i64, at: DateTime<Utc>) {
        if let Some(task) = self.lock().tasks.get_mut(&id) {
            task.last_activity_at = Some(at);
        }
    }
}

#[async_trait]
impl JobRepository for MockFarmStore {
    async fn create_with_tasks(
        &self,
        job: &Job,
        drafts: &[TaskDraft],
    ) -> FarmResult<(Job, Vec<Task>)> {
        let mut state = self.lock();
        if let Some((index, target)) = drafts
            .iter()
            .enumerate()
            .find_map(|(i, d)| d.blocks.filter(|t| *t >= drafts.len()).map(|t| (i, t)))
        {
            return Err(FarmError::Internal(format!(
                "任务草稿 {index} 的依赖指针无效: {target}"
            )));
        }

        let now = Utc::now();
        state.next_job_id += 1;
        let mut created_job = job.clone();
        created_job.id = state.next_job_id;
        created_job.status = JobStatus::Queued;
        created_job.created_at = now;
        created_job.updated_at = now;

        let first_task_id = state.next_task_id + 1;
        let mut tasks = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.iter().enumerate() {
            tasks.push(Task {
                id: first_task_id + index as i64,
                job_id: created_job.id,
                name: draft.name.clone(),
                task_type: draft.task_type.clone(),
                settings: draft.settings.clone(),
                priority: draft.priority,
                status: TaskStatus::Queued,
                blocks_task_id: draft.blocks.map(|b| first_task_id + b as i64),
                manager_id: None,
                worker: None,
                activity: Default::default(),
                log: String::new(),
                created_at: now,
                updated_at: now,
                last_activity_at: None,
            });
        }
        state.next_task_id += drafts.len() as i64;

        state.jobs.insert(created_job.id, created_job.clone());
        for task in &tasks {
            state.tasks.insert(task.id, task.clone());
        }
        Ok((created_job, tasks))
    }

    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list(&self) -> FarmResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn update_status(
        &self,
        id: i64,
        expected: JobStatus,
        status: JobStatus,
    ) -> FarmResult<bool> {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != expected {
            return Ok(false);
        }
        job.status = status;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: i64) -> FarmResult<()> {
        let mut state = self.lock();
        if state.jobs.remove(&id).is_none() {
            return Err(FarmError::JobNotFound { id });
        }
        state.tasks.retain(|_, task| task.job_id != id);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MockFarmStore {
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Task>> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn list_by_job(&self, job_id: i64) -> FarmResult<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_dispatchable(&self, filter: &DispatchFilter) -> FarmResult<Vec<Task>> {
        let state = self.lock();
        let mut candidates: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Queued)
            .filter(|task| {
                state
                    .jobs
                    .get(&task.job_id)
                    .is_some_and(|job| job.is_dispatchable())
            })
            .filter(|task| match &filter.job_type {
                Some(job_type) => {
                    task.task_type == *job_type
                        || state
                            .jobs
                            .get(&task.job_id)
                            .is_some_and(|job| job.job_type == *job_type)
                }
                None => true,
            })
            .filter(|task| {
                !state.tasks.values().any(|upstream| {
                    upstream.blocks_task_id == Some(task.id)
                        && upstream.status != TaskStatus::Completed
                })
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(filter.limit.max(1) as usize);
        Ok(candidates)
    }

    async fn try_claim(&self, id: i64, assignment: &TaskAssignment) -> FarmResult<bool> {
        let mut state = self.lock();
        state.claim_attempts += 1;
        let stolen = if state.stolen_claims > 0 {
            state.stolen_claims -= 1;
            true
        } else {
            false
        };

        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Queued {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Processing;
        task.updated_at = now;
        task.last_activity_at = Some(now);
        if stolen {
            task.worker = Some("rival".to_string());
            return Ok(false);
        }
        task.manager_id = assignment.manager_id;
        task.worker = assignment.worker.clone();
        Ok(true)
    }

    async fn update_if_status(
        &self,
        id: i64,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> FarmResult<bool> {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != expected || !update.guards_hold(task) {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = update.status;
        if let Some(activity) = &update.activity {
            task.activity = activity.clone();
        }
        if let Some(log) = &update.log_append {
            task.log.push_str(log);
        }
        if update.clear_assignment {
            task.manager_id = None;
            task.worker = None;
        }
        task.updated_at = now;
        task.last_activity_at = Some(now);
        Ok(true)
    }

    async fn list_processing(&self) -> FarmResult<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Processing)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ManagerRepository for MockFarmStore {
    async fn upsert(&self, registration: &ManagerRegistration) -> FarmResult<Manager> {
        let mut state = self.lock();
        let now = Utc::now();
        let existing = state
            .managers
            .values()
            .find(|m| m.host == registration.host && m.port == registration.port)
            .map(|m| m.id);

        let id = match existing {
            Some(id) => id,
            None => {
                state.next_manager_id += 1;
                state.next_manager_id
            }
        };
        let registered_at = state
            .managers
            .get(&id)
            .map(|m| m.registered_at)
            .unwrap_or(now);

        let manager = Manager {
            id,
            name: registration.name.clone(),
            host: registration.host.clone(),
            port: registration.port,
            capacity: registration.capacity,
            status: ManagerStatus::Online,
            last_seen: Some(now),
            last_probe_error: None,
            registered_at,
        };
        state.managers.insert(id, manager.clone());
        Ok(manager)
    }

    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Manager>> {
        Ok(self.lock().managers.get(&id).cloned())
    }

    async fn list(&self) -> FarmResult<Vec<Manager>> {
        Ok(self.lock().managers.values().cloned().collect())
    }

    async fn record_probe(
        &self,
        id: i64,
        status: ManagerStatus,
        error: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> FarmResult<()> {
        let mut state = self.lock();
        let manager = state
            .managers
            .get_mut(&id)
            .ok_or(FarmError::ManagerNotFound { id })?;
        manager.status = status;
        manager.last_probe_error = error.map(str::to_string);
        if status == ManagerStatus::Online {
            manager.last_seen = Some(checked_at);
        }
        Ok(())
    }

    async fn touch(&self, id: i64, seen_at: DateTime<Utc>) -> FarmResult<()> {
        let mut state = self.lock();
        let manager = state
            .managers
            .get_mut(&id)
            .ok_or(FarmError::ManagerNotFound { id })?;
        manager.status = ManagerStatus::Online;
        manager.last_seen = Some(seen_at);
        manager.last_probe_error = None;
        Ok(())
    }
}
