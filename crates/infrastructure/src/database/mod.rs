pub mod mapping;
pub mod migrations;
pub mod sqlite;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use renderfarm_core::config::models::DatabaseConfig;
use renderfarm_core::traits::{JobRepository, ManagerRepository, TaskRepository};
use renderfarm_core::FarmResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{debug, info};

pub use migrations::run_migrations;
pub use sqlite::{SqliteJobRepository, SqliteManagerRepository, SqliteTaskRepository};

pub type DbPool = Pool<Sqlite>;

/// 数据库管理器：连接池、表结构迁移与健康检查
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> FarmResult<Self> {
        debug!("连接数据库: {}", config.url);

        // 启用外键约束（作业删除级联到任务）和WAL模式
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        info!("数据库连接池已创建 (最大连接数: {})", config.max_connections);
        Ok(Self { pool })
    }

    /// 创建连接并完成迁移
    pub async fn connect_and_migrate(config: &DatabaseConfig) -> FarmResult<Self> {
        let manager = Self::new(config).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> FarmResult<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> FarmResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobRepository::new(self.pool.clone()))
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn manager_repository(&self) -> Arc<dyn ManagerRepository> {
        Arc::new(SqliteManagerRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_migrate_and_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("farm.db").display()),
            ..Default::default()
        };

        let manager = DatabaseManager::connect_and_migrate(&config).await.unwrap();
        manager.health_check().await.unwrap();

        // 迁移可重复执行
        manager.migrate().await.unwrap();

        let jobs = manager.job_repository().list().await.unwrap();
        assert!(jobs.is_empty());
        manager.close().await;
    }
}
