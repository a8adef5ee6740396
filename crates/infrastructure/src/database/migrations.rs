use renderfarm_core::FarmResult;
use sqlx::SqlitePool;
use tracing::debug;

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> FarmResult<()> {
    debug!("Running SQLite database migrations");

    // 作业表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            job_type TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            settings TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'queued',
            project_id INTEGER,
            user_id INTEGER,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 任务表，删除作业时级联删除
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            settings TEXT NOT NULL DEFAULT '{}',
            priority INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'queued',
            blocks_task_id INTEGER,
            manager_id INTEGER,
            worker TEXT,
            activity TEXT,
            log TEXT NOT NULL DEFAULT '',
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            last_activity_at DATETIME,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Manager表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS managers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            capacity_kind TEXT NOT NULL DEFAULT 'fixed',
            capacity_workers INTEGER,
            status TEXT NOT NULL DEFAULT 'unknown',
            last_seen DATETIME,
            last_probe_error TEXT,
            registered_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = vec![
        "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_job_id ON tasks(job_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_dispatch ON tasks(status, priority DESC, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_blocks_task_id ON tasks(blocks_task_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_managers_host_port ON managers(host, port)",
        "CREATE INDEX IF NOT EXISTS idx_managers_status ON managers(status)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
