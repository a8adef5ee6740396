use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sqlite_text_enum;

/// 渲染作业
///
/// 用户提交的一次渲染意图。作业在创建时被一次性分解为若干任务，
/// 之后不再重新推导；其状态由所属任务的状态聚合而来。
///
/// # 字段说明
///
/// - `job_type`: 作业类型标签，决定使用哪个分解器
/// - `priority`: 优先级，数值越大越先调度
/// - `settings`: 与作业类型相关的设置（JSON 对象）
/// - `status`: 聚合状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub job_type: String,
    pub priority: i32,
    pub settings: serde_json::Value,
    pub status: JobStatus,
    pub project_id: Option<i64>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// 由提交请求构造一个尚未持久化的作业
    pub fn from_submission(new_job: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            name: new_job.name,
            job_type: new_job.job_type,
            priority: new_job.priority,
            settings: new_job.settings,
            status: JobStatus::Queued,
            project_id: new_job.project_id,
            user_id: new_job.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// 作业是否仍允许派发任务
    pub fn is_dispatchable(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Active)
    }
}

/// 作业提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub job_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// 作业聚合状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

sqlite_text_enum!(JobStatus);
