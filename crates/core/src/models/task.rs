use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sqlite_text_enum;

/// 渲染任务
///
/// 可独立派发的最小工作单元，由作业分解器生成。
///
/// # 字段说明
///
/// - `task_type`: 任务类型，决定命令编译器与设置格式
/// - `settings`: 已解析的任务设置，各平台路径已预先展开
/// - `blocks_task_id`: 依赖指针，指向在本任务完成前不得执行的下游任务
/// - `manager_id` / `worker`: 当前持有者
/// - `activity`: 最近一次进度快照
/// - `log`: 累积的日志文本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub job_id: i64,
    pub name: String,
    pub task_type: String,
    pub settings: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub blocks_task_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub worker: Option<String>,
    #[serde(default)]
    pub activity: TaskActivity,
    #[serde(default)]
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 读取字符串类型的设置项
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}

/// 任务进度快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskActivity {
    pub current_frame: Option<i64>,
    pub remaining_seconds: Option<u64>,
    pub stage: Option<String>,
    pub last_saved_path: Option<String>,
    pub thumbnail: Option<String>,
}

/// 任务状态
///
/// ```text
/// queued -> processing -> completed | failed
/// processing -> canceled
/// queued | processing -> aborted
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Canceled,
    Aborted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Aborted => "aborted",
        }
    }

    /// 终止状态：完成或失败
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 不再允许任何后续转换的状态
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled | TaskStatus::Aborted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            "aborted" => Ok(TaskStatus::Aborted),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

sqlite_text_enum!(TaskStatus);

/// 分解器输出的任务草稿，尚未持久化
///
/// `blocks` 为同一批草稿中被本任务阻塞的草稿下标，持久化时换算为 `blocks_task_id`。
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub name: String,
    pub task_type: String,
    pub settings: serde_json::Value,
    pub priority: i32,
    pub blocks: Option<usize>,
}

/// 调度查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct DispatchFilter {
    /// 与作业类型或任务类型匹配
    pub job_type: Option<String>,
    pub limit: i64,
}

/// 领取任务时写入的持有者信息
#[derive(Debug, Clone, Default)]
pub struct TaskAssignment {
    pub manager_id: Option<i64>,
    pub worker: Option<String>,
}

/// 条件更新的内容
///
/// `expected_worker` 与 `expected_activity_at` 是状态之外的附加前置条件，
/// 外层为 None 时不检查，内层 None 要求字段为空。
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub activity: Option<TaskActivity>,
    pub log_append: Option<String>,
    /// 为 true 时清空 manager_id 与 worker（重新排队）
    pub clear_assignment: bool,
    pub expected_worker: Option<Option<String>>,
    pub expected_activity_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            activity: None,
            log_append: None,
            clear_assignment: false,
            expected_worker: None,
            expected_activity_at: None,
        }
    }

    pub fn with_activity(mut self, activity: TaskActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log_append = Some(log.into());
        self
    }

    pub fn clearing_assignment(mut self) -> Self {
        self.clear_assignment = true;
        self
    }

    /// 仅当持有者仍是 `worker` 时生效
    pub fn held_by(mut self, worker: Option<String>) -> Self {
        self.expected_worker = Some(worker);
        self
    }

    /// 仅当最近活动时间未变时生效
    pub fn unchanged_since(mut self, last_activity_at: Option<DateTime<Utc>>) -> Self {
        self.expected_activity_at = Some(last_activity_at);
        self
    }

    /// 附加前置条件是否与任务当前字段一致
    pub fn guards_hold(&self, task: &Task) -> bool {
        let worker_ok = self
            .expected_worker
            .as_ref()
            .is_none_or(|w| *w == task.worker);
        let activity_ok = self
            .expected_activity_at
            .is_none_or(|at| at == task.last_activity_at);
        worker_ok && activity_ok
    }
}

/// Manager上报的任务状态
///
/// `status` 为 processing 时只是进度更新，日志与进度快照可选。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusReport {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<TaskActivity>,
    /// 上报方的 Worker 名称，与当前持有者不符时上报被拒绝
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl TaskStatusReport {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            log: None,
            activity: None,
            worker: None,
        }
    }

    pub fn from_worker(mut self, worker: Option<String>) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_activity(mut self, activity: TaskActivity) -> Self {
        self.activity = Some(activity);
        self
    }
}
