use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renderfarm_core::{
    models::{Manager, ManagerRegistration, ManagerStatus},
    traits::ManagerRepository,
    FarmResult,
};
use sqlx::SqlitePool;
use tracing::{debug, instrument, warn};

use super::connect_embedded;
use crate::database::mapping::{row_to_manager, MappingHelpers, MANAGER_COLUMNS};
use crate::repo_context;

pub struct SqliteManagerRepository {
    pool: SqlitePool,
}

impl SqliteManagerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new_embedded(database_path: &str) -> FarmResult<Self> {
        Ok(Self::new(connect_embedded(database_path).await?))
    }
}

#[async_trait]
impl ManagerRepository for SqliteManagerRepository {
    #[instrument(skip(self, registration), fields(
        host = %registration.host,
        port = registration.port,
    ))]
    async fn upsert(&self, registration: &ManagerRegistration) -> FarmResult<Manager> {
        let context = repo_context!(Create, Manager)
            .with_additional_info(format!("{}:{}", registration.host, registration.port));
        let now = Utc::now();
        let (capacity_kind, capacity_workers) =
            MappingHelpers::capacity_to_columns(&registration.capacity);

        // (host, port) 已存在时复用原记录
        let sql = format!(
            r#"
            INSERT INTO managers (name, host, port, capacity_kind, capacity_workers, status, last_seen, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT(host, port) DO UPDATE SET
                name = excluded.name,
                capacity_kind = excluded.capacity_kind,
                capacity_workers = excluded.capacity_workers,
                status = excluded.status,
                last_seen = excluded.last_seen,
                last_probe_error = NULL
            RETURNING {MANAGER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&registration.name)
            .bind(&registration.host)
            .bind(i64::from(registration.port))
            .bind(capacity_kind)
            .bind(capacity_workers)
            .bind(ManagerStatus::Online)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;

        let manager = row_to_manager(&row)?;
        context
            .with_id(manager.id)
            .log_success(Some(&format!("名称: {}", manager.name)));
        Ok(manager)
    }

    #[instrument(skip(self), fields(manager_id = %id))]
    async fn get_by_id(&self, id: i64) -> FarmResult<Option<Manager>> {
        let context = repo_context!(Read, Manager, id = id);
        let sql = format!("SELECT {MANAGER_COLUMNS} FROM managers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;

        row.as_ref().map(row_to_manager).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> FarmResult<Vec<Manager>> {
        let context = repo_context!(Query, Manager);
        let sql = format!("SELECT {MANAGER_COLUMNS} FROM managers ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| context.database_error(e))?;
        rows.iter().map(row_to_manager).collect()
    }

    #[instrument(skip(self, error), fields(manager_id = %id, status = %status))]
    async fn record_probe(
        &self,
        id: i64,
        status: ManagerStatus,
        error: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> FarmResult<()> {
        let context = repo_context!(Update, Manager, id = id);

        // 只有探测成功才刷新 last_seen
        let result = sqlx::query(
            r#"
            UPDATE managers
            SET status = $2,
                last_probe_error = $3,
                last_seen = CASE WHEN $2 = 'online' THEN $4 ELSE last_seen END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(checked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        if result.rows_affected() == 0 {
            warn!("记录探测结果时Manager不存在: ID {}", id);
            return Err(context.not_found());
        }
        debug!("Manager {} 探测结果: {}", id, status);
        Ok(())
    }

    #[instrument(skip(self), fields(manager_id = %id))]
    async fn touch(&self, id: i64, seen_at: DateTime<Utc>) -> FarmResult<()> {
        let context = repo_context!(Update, Manager, id = id);
        let result = sqlx::query(
            "UPDATE managers SET status = $2, last_seen = $3, last_probe_error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(ManagerStatus::Online)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(|e| context.database_error(e))?;

        if result.rows_affected() == 0 {
            return Err(context.not_found());
        }
        Ok(())
    }
}
