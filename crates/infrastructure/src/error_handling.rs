//! 仓储操作的错误上下文
//!
//! 数据库错误在这里统一附加实体与操作信息并记录日志，
//! 然后转换为 `FarmError` 返回给调用方。

use std::fmt;

use renderfarm_core::FarmError;
use tracing::{debug, error};

/// 仓储操作类型
#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Claim => write!(f, "领取"),
        }
    }
}

/// 仓储实体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Job,
    Task,
    Manager,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Job => write!(f, "作业"),
            EntityKind::Task => write!(f, "任务"),
            EntityKind::Manager => write!(f, "Manager"),
        }
    }
}

/// 一次仓储操作的上下文
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: RepositoryOperation,
    pub entity: EntityKind,
    pub id: Option<i64>,
    pub additional_info: Option<String>,
}

impl OperationContext {
    pub fn new(operation: RepositoryOperation, entity: EntityKind) -> Self {
        Self {
            operation,
            entity,
            id: None,
            additional_info: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn entity_description(&self) -> String {
        match self.id {
            Some(id) => format!("{} (ID: {})", self.entity, id),
            None => self.entity.to_string(),
        }
    }

    /// 记录数据库错误并转换
    pub fn database_error(&self, e: sqlx::Error) -> FarmError {
        error!(
            "{}{}失败: {}{}",
            self.operation,
            self.entity_description(),
            e,
            self.additional_info
                .as_deref()
                .map(|i| format!(" ({i})"))
                .unwrap_or_default()
        );
        FarmError::Database(e)
    }

    /// 目标记录不存在
    pub fn not_found(&self) -> FarmError {
        let id = self.id.unwrap_or_default();
        match self.entity {
            EntityKind::Job => FarmError::JobNotFound { id },
            EntityKind::Task => FarmError::TaskNotFound { id },
            EntityKind::Manager => FarmError::ManagerNotFound { id },
        }
    }

    pub fn log_success(&self, details: Option<&str>) {
        match details {
            Some(details) => debug!(
                "{}{}成功: {}",
                self.operation,
                self.entity_description(),
                details
            ),
            None => debug!("{}{}成功", self.operation, self.entity_description()),
        }
    }
}

/// 构造操作上下文
#[macro_export]
macro_rules! repo_context {
    ($operation:ident, $entity:ident) => {
        $crate::error_handling::OperationContext::new(
            $crate::error_handling::RepositoryOperation::$operation,
            $crate::error_handling::EntityKind::$entity,
        )
    };
    ($operation:ident, $entity:ident, id = $id:expr) => {
        $crate::error_handling::OperationContext::new(
            $crate::error_handling::RepositoryOperation::$operation,
            $crate::error_handling::EntityKind::$entity,
        )
        .with_id($id)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_matches_entity() {
        let err = repo_context!(Read, Task, id = 7).not_found();
        assert!(matches!(err, FarmError::TaskNotFound { id: 7 }));

        let err = repo_context!(Update, Manager, id = 2).not_found();
        assert!(matches!(err, FarmError::ManagerNotFound { id: 2 }));
    }

    #[test]
    fn test_entity_description() {
        assert_eq!(
            repo_context!(Delete, Job, id = 3).entity_description(),
            "作业 (ID: 3)"
        );
        assert_eq!(repo_context!(Query, Task).entity_description(), "任务");
    }
}
