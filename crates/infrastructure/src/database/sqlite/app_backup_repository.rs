use async_trait::async_trait;
use executor_domain::{AppBackup, AppBackupRepository, BackupStatus};
use executor_errors::{ExecutorError, ExecutorResult};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteAppBackupRepository {
    pool: SqlitePool,
}

impl SqliteAppBackupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_backup(row: &sqlx::sqlite::SqliteRow) -> ExecutorResult<AppBackup> {
        let status: String = row.try_get("status")?;
        Ok(AppBackup {
            backup_id: row.try_get("backup_id")?,
            event_id: row.try_get("event_id")?,
            group_id: row.try_get("group_id")?,
            status: BackupStatus::parse(&status)?,
            version: row.try_get("version")?,
            source_dir: row.try_get("source_dir")?,
            source_type: row.try_get("source_type")?,
            backup_mode: row.try_get("backup_mode")?,
            backup_size: row.try_get("backup_size")?,
            deleted: row.try_get("deleted")?,
            create_time: row.try_get("create_time")?,
        })
    }
}

#[async_trait]
impl AppBackupRepository for SqliteAppBackupRepository {
    #[instrument(skip(self, backup), fields(backup_id = %backup.backup_id))]
    async fn create(&self, backup: &AppBackup) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO region_app_backup
                (backup_id, event_id, group_id, status, version, source_dir, source_type,
                 backup_mode, backup_size, deleted, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&backup.backup_id)
        .bind(&backup.event_id)
        .bind(&backup.group_id)
        .bind(backup.status.as_str())
        .bind(&backup.version)
        .bind(&backup.source_dir)
        .bind(&backup.source_type)
        .bind(&backup.backup_mode)
        .bind(backup.backup_size)
        .bind(backup.deleted)
        .bind(backup.create_time)
        .execute(&self.pool)
        .await?;

        debug!("创建备份记录: {}", backup.backup_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, backup_id: &str) -> ExecutorResult<Option<AppBackup>> {
        let row = sqlx::query("SELECT * FROM region_app_backup WHERE backup_id = $1")
            .bind(backup_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_backup).transpose()
    }

    #[instrument(skip(self, backup), fields(backup_id = %backup.backup_id, status = backup.status.as_str()))]
    async fn update(&self, backup: &AppBackup) -> ExecutorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE region_app_backup
            SET event_id = $2, group_id = $3, status = $4, version = $5, source_dir = $6,
                source_type = $7, backup_mode = $8, backup_size = $9, deleted = $10
            WHERE backup_id = $1
            "#,
        )
        .bind(&backup.backup_id)
        .bind(&backup.event_id)
        .bind(&backup.group_id)
        .bind(backup.status.as_str())
        .bind(&backup.version)
        .bind(&backup.source_dir)
        .bind(&backup.source_type)
        .bind(&backup.backup_mode)
        .bind(backup.backup_size)
        .bind(backup.deleted)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutorError::not_found("region_app_backup", &backup.backup_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    #[tokio::test]
    async fn test_backup_crud() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteAppBackupRepository::new(db.pool().clone());

        let mut backup = AppBackup::new("b1", "g1");
        backup.backup_mode = "full-offline".to_string();
        repo.create(&backup).await.unwrap();

        let loaded = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BackupStatus::Starting);
        assert_eq!(loaded.backup_mode, "full-offline");

        backup.status = BackupStatus::Success;
        backup.backup_size = 1024;
        repo.update(&backup).await.unwrap();

        let loaded = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BackupStatus::Success);
        assert_eq!(loaded.backup_size, 1024);

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_backup_fails() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteAppBackupRepository::new(db.pool().clone());

        let err = repo.update(&AppBackup::new("nope", "g")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RecordNotFound { .. }));
    }
}
