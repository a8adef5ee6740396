//! 测试数据构造器

use chrono::{DateTime, Utc};
use renderfarm_core::models::{
    Job, JobStatus, Manager, ManagerCapacity, ManagerStatus, Task, TaskActivity, TaskStatus,
};

/// 构造测试用作业
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            job: Job {
                id: 1,
                name: "test_job".to_string(),
                job_type: "blender_simple_render".to_string(),
                priority: 50,
                settings: serde_json::json!({}),
                status: JobStatus::Queued,
                project_id: None,
                user_id: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job.job_type = job_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.job.settings = settings;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造测试用任务
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: 1,
                job_id: 1,
                name: "test_task".to_string(),
                task_type: "blender_simple_render".to_string(),
                settings: serde_json::json!({}),
                priority: 50,
                status: TaskStatus::Queued,
                blocks_task_id: None,
                manager_id: None,
                worker: None,
                activity: TaskActivity::default(),
                log: String::new(),
                created_at: now,
                updated_at: now,
                last_activity_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_job_id(mut self, job_id: i64) -> Self {
        self.task.job_id = job_id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.task.settings = settings;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn blocking(mut self, task_id: i64) -> Self {
        self.task.blocks_task_id = Some(task_id);
        self
    }

    /// 已被某个Manager的Worker领取
    pub fn assigned_to(mut self, manager_id: i64, worker: &str) -> Self {
        self.task.status = TaskStatus::Processing;
        self.task.manager_id = Some(manager_id);
        self.task.worker = Some(worker.to_string());
        self.task.last_activity_at = Some(Utc::now());
        self
    }

    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_activity_at = Some(at);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造测试用Manager
pub struct ManagerBuilder {
    manager: Manager,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            manager: Manager {
                id: 1,
                name: "test_manager".to_string(),
                host: "127.0.0.1".to_string(),
                port: 7777,
                capacity: ManagerCapacity::Fixed(1),
                status: ManagerStatus::Online,
                last_seen: Some(Utc::now()),
                last_probe_error: None,
                registered_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.manager.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.manager.name = name.to_string();
        self
    }

    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.manager.host = host.to_string();
        self.manager.port = port;
        self
    }

    pub fn with_capacity(mut self, capacity: ManagerCapacity) -> Self {
        self.manager.capacity = capacity;
        self
    }

    pub fn with_status(mut self, status: ManagerStatus) -> Self {
        self.manager.status = status;
        self
    }

    pub fn offline(mut self) -> Self {
        self.manager.status = ManagerStatus::Offline;
        self.manager.last_probe_error = Some("connection refused".to_string());
        self
    }

    pub fn last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.manager.last_seen = Some(at);
        self
    }

    pub fn build(self) -> Manager {
        self.manager
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
