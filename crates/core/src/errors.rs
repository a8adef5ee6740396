use thiserror::Error;

use crate::models::TaskStatus;

/// 渲染农场错误类型定义
#[derive(Debug, Error)]
pub enum FarmError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("缺少必需的作业设置: {key}")]
    MissingSetting { key: String },

    #[error("作业设置无效: {key} - {message}")]
    InvalidSetting { key: String, message: String },

    #[error("未知的作业类型: {0}")]
    UnknownJobType(String),

    #[error("未知的任务类型: {0}")]
    UnknownTaskType(String),

    #[error("调度冲突: 任务 {id} 已被其他请求领取")]
    SchedulingConflict { id: i64 },

    #[error("任务 {id} 的状态转换无效: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("任务 {id} 已不由 {worker} 持有")]
    NotTaskHolder { id: i64, worker: String },

    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("Manager未找到: {id}")]
    ManagerNotFound { id: i64 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FarmError {
    pub fn missing_setting(key: impl Into<String>) -> Self {
        FarmError::MissingSetting { key: key.into() }
    }

    pub fn invalid_setting(key: impl Into<String>, message: impl Into<String>) -> Self {
        FarmError::InvalidSetting {
            key: key.into(),
            message: message.into(),
        }
    }

    /// 是否属于作业设置类错误（提交方可修正，作业被拒绝且不产生任务）
    pub fn is_settings_error(&self) -> bool {
        matches!(
            self,
            FarmError::MissingSetting { .. }
                | FarmError::InvalidSetting { .. }
                | FarmError::UnknownJobType(_)
                | FarmError::UnknownTaskType(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FarmError::JobNotFound { .. }
                | FarmError::TaskNotFound { .. }
                | FarmError::ManagerNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for FarmError {
    fn from(e: serde_json::Error) -> Self {
        FarmError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, FarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_classification() {
        assert!(FarmError::missing_setting("frames").is_settings_error());
        assert!(FarmError::invalid_setting("chunk_size", "必须大于0").is_settings_error());
        assert!(FarmError::UnknownJobType("foo".to_string()).is_settings_error());
        assert!(!FarmError::TaskNotFound { id: 1 }.is_settings_error());
        assert!(!FarmError::SchedulingConflict { id: 1 }.is_settings_error());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = FarmError::InvalidTransition {
            id: 7,
            from: TaskStatus::Completed,
            to: TaskStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "任务 7 的状态转换无效: completed -> processing"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FarmError = json_err.into();
        assert!(matches!(err, FarmError::Serialization(_)));
    }
}
