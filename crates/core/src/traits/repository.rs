//! 数据仓储层接口定义
//!
//! 调度核心只依赖以下能力：
//! - 按字段查询与按 ID 读取
//! - 插入与删除
//! - 带前置条件的按 ID 更新（仅当当前状态等于期望状态时才生效）
//!
//! 条件更新是原子领取的基础：选择与领取必须由一条条件更新完成，
//! 先读后写会产生竞争。
//!
//! ## 实现
//!
//! - SQLite 实现（`renderfarm-infrastructure`）
//! - 内存实现（`renderfarm-testing-utils`，测试用）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    DispatchFilter, Job, JobStatus, Manager, ManagerRegistration, ManagerStatus, Task,
    TaskAssignment, TaskDraft, TaskStatus, TaskUpdate,
};
use crate::FarmResult;

/// 作业仓储接口
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 在同一事务中创建作业及其全部任务
    ///
    /// 要么全部写入，要么全部不写入。草稿中的 `blocks` 下标会被换算为
    /// 对应任务的数据库 ID 并写入 `blocks_task_id`。
    async fn create_with_tasks(&self, job: &Job, drafts: &[TaskDraft])
        -> FarmResult<(Job, Vec<Task>)>;

    /// 根据ID获取作业
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Job>>;

    /// 获取全部作业，按创建时间倒序
    async fn list(&self) -> FarmResult<Vec<Job>>;

    /// 条件更新作业聚合状态
    ///
    /// 仅当当前状态等于 `expected` 时生效，返回是否生效。作业不存在时返回 false。
    async fn update_status(&self, id: i64, expected: JobStatus, status: JobStatus)
        -> FarmResult<bool>;

    /// 删除作业，级联删除其任务
    async fn delete(&self, id: i64) -> FarmResult<()>;
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 根据ID获取任务
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Task>>;

    /// 获取作业下的全部任务，按ID升序
    async fn list_by_job(&self, job_id: i64) -> FarmResult<Vec<Task>>;

    /// 查询当前可派发的任务候选
    ///
    /// 条件：状态为 queued、所属作业处于 queued/active、满足类型过滤、
    /// 且不存在指向它（`blocks_task_id == id`）但尚未 completed 的上游任务。
    /// 排序：优先级降序，其次创建时间升序，最后 ID 升序。
    async fn find_dispatchable(&self, filter: &DispatchFilter) -> FarmResult<Vec<Task>>;

    /// 原子领取任务
    ///
    /// 仅当任务仍为 queued 时将其置为 processing 并记录持有者。
    /// 返回 false 表示被其他轮询方抢先领取。
    async fn try_claim(&self, id: i64, assignment: &TaskAssignment) -> FarmResult<bool>;

    /// 条件更新任务状态
    ///
    /// 仅当当前状态等于 `expected` 时生效，返回是否生效。
    async fn update_if_status(
        &self,
        id: i64,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> FarmResult<bool>;

    /// 获取所有处于 processing 状态的任务
    async fn list_processing(&self) -> FarmResult<Vec<Task>>;
}

/// Manager仓储接口
#[async_trait]
pub trait ManagerRepository: Send + Sync {
    /// 注册Manager，按 (host, port) 去重；已存在时更新名称与容量
    async fn upsert(&self, registration: &ManagerRegistration) -> FarmResult<Manager>;

    /// 根据ID获取Manager
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Manager>>;

    /// 获取全部Manager
    async fn list(&self) -> FarmResult<Vec<Manager>>;

    /// 记录存活探测结果
    async fn record_probe(
        &self,
        id: i64,
        status: ManagerStatus,
        error: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> FarmResult<()>;

    /// 记录一次来自该Manager的请求（轮询即存活证明）
    async fn touch(&self, id: i64, seen_at: DateTime<Utc>) -> FarmResult<()>;
}
