//! 行映射辅助函数
//!
//! SQLite 没有原生 JSON 类型，设置与进度快照以 JSON 文本存储。

use renderfarm_core::{
    FarmError, FarmResult, Job, Manager, ManagerCapacity, Task, TaskActivity,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_json_sqlite(row: &SqliteRow, field_name: &str) -> FarmResult<serde_json::Value> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| FarmError::Serialization(format!("解析字段 {field_name} 失败: {e}")))
    }

    /// 进度快照为空或无法解析时回退为默认值
    pub fn parse_activity_sqlite(row: &SqliteRow, field_name: &str) -> TaskActivity {
        row.try_get::<Option<String>, _>(field_name)
            .ok()
            .flatten()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn capacity_to_columns(capacity: &ManagerCapacity) -> (&'static str, Option<i64>) {
        match capacity {
            ManagerCapacity::Fixed(n) => ("fixed", Some(i64::from(*n))),
            ManagerCapacity::Virtual => ("virtual", None),
        }
    }

    pub fn parse_capacity_sqlite(row: &SqliteRow) -> FarmResult<ManagerCapacity> {
        let kind: String = row.try_get("capacity_kind")?;
        let workers: Option<i64> = row.try_get("capacity_workers")?;
        match kind.as_str() {
            "virtual" => Ok(ManagerCapacity::Virtual),
            "fixed" => {
                let workers = u32::try_from(workers.unwrap_or(0))
                    .map_err(|e| FarmError::Serialization(format!("Worker数量无效: {e}")))?;
                Ok(ManagerCapacity::Fixed(workers))
            }
            other => Err(FarmError::Serialization(format!("未知的容量类型: {other}"))),
        }
    }
}

pub fn row_to_job(row: &SqliteRow) -> FarmResult<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        job_type: row.try_get("job_type")?,
        priority: row.try_get("priority")?,
        settings: MappingHelpers::parse_json_sqlite(row, "settings")?,
        status: row.try_get("status")?,
        project_id: row.try_get("project_id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn row_to_task(row: &SqliteRow) -> FarmResult<Task> {
    Ok(Task {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        name: row.try_get("name")?,
        task_type: row.try_get("task_type")?,
        settings: MappingHelpers::parse_json_sqlite(row, "settings")?,
        priority: row.try_get("priority")?,
        status: row.try_get("status")?,
        blocks_task_id: row.try_get("blocks_task_id")?,
        manager_id: row.try_get("manager_id")?,
        worker: row.try_get("worker")?,
        activity: MappingHelpers::parse_activity_sqlite(row, "activity"),
        log: row.try_get("log")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
    })
}

pub fn row_to_manager(row: &SqliteRow) -> FarmResult<Manager> {
    let port: i64 = row.try_get("port")?;
    Ok(Manager {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: u16::try_from(port)
            .map_err(|e| FarmError::Serialization(format!("端口无效 {port}: {e}")))?,
        capacity: MappingHelpers::parse_capacity_sqlite(row)?,
        status: row.try_get("status")?,
        last_seen: row.try_get("last_seen")?,
        last_probe_error: row.try_get("last_probe_error")?,
        registered_at: row.try_get("registered_at")?,
    })
}

pub const JOB_COLUMNS: &str =
    "id, name, job_type, priority, settings, status, project_id, user_id, created_at, updated_at";

pub const TASK_COLUMNS: &str = "id, job_id, name, task_type, settings, priority, status, blocks_task_id, manager_id, worker, activity, log, created_at, updated_at, last_activity_at";

pub const MANAGER_COLUMNS: &str = "id, name, host, port, capacity_kind, capacity_workers, status, last_seen, last_probe_error, registered_at";
