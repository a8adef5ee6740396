pub mod sqlite_job_repository;
pub mod sqlite_manager_repository;
pub mod sqlite_task_repository;

pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_manager_repository::SqliteManagerRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use std::str::FromStr;

use renderfarm_core::FarmResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use super::migrations::run_migrations;

/// 打开嵌入式SQLite数据库并完成迁移
pub async fn connect_embedded(database_path: &str) -> FarmResult<SqlitePool> {
    debug!("Creating embedded SQLite pool at: {}", database_path);

    let connect_options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    /// 临时目录中的测试数据库，目录随返回值一起释放
    pub async fn setup_test_db() -> (SqlitePool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = super::connect_embedded(&url).await.unwrap();
        (pool, dir)
    }
}
