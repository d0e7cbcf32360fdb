use executor_domain::{
    AppBackupRepository, PluginBuildRepository, ServiceRepository, VersionRepository,
};
use executor_errors::ExecutorResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::schema;
use super::sqlite::{
    SqliteAppBackupRepository, SqlitePluginBuildRepository, SqliteServiceRepository,
    SqliteVersionRepository,
};

/// 数据库连接池与仓储工厂
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(url: &str, max_connections: u32, connect_timeout: Duration) -> ExecutorResult<Self> {
        debug!("连接数据库: {}", url);

        let connect_options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect_with(connect_options)
            .await?;

        schema::migrate(&pool).await?;
        info!("✅ 数据库迁移完成");

        Ok(Self { pool })
    }

    /// 单连接内存库, 所有连接共享同一份数据
    pub async fn in_memory() -> ExecutorResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        schema::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> ExecutorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn app_backup_repository(&self) -> Arc<dyn AppBackupRepository> {
        Arc::new(SqliteAppBackupRepository::new(self.pool.clone()))
    }

    pub fn service_repository(&self) -> Arc<dyn ServiceRepository> {
        Arc::new(SqliteServiceRepository::new(self.pool.clone()))
    }

    pub fn version_repository(&self) -> Arc<dyn VersionRepository> {
        Arc::new(SqliteVersionRepository::new(self.pool.clone()))
    }

    pub fn plugin_build_repository(&self) -> Arc<dyn PluginBuildRepository> {
        Arc::new(SqlitePluginBuildRepository::new(self.pool.clone()))
    }
}
