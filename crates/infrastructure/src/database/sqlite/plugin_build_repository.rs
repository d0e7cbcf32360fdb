use async_trait::async_trait;
use executor_domain::{PluginBuildRepository, PluginBuildVersion};
use executor_errors::{ExecutorError, ExecutorResult};
use sqlx::{Row, SqliteExecutor, SqlitePool};
use tracing::{debug, instrument};

pub struct SqlitePluginBuildRepository {
    pool: SqlitePool,
}

impl SqlitePluginBuildRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_build_version(row: &sqlx::sqlite::SqliteRow) -> ExecutorResult<PluginBuildVersion> {
        Ok(PluginBuildVersion {
            id: row.try_get("id")?,
            version_id: row.try_get("version_id")?,
            deploy_version: row.try_get("deploy_version")?,
            plugin_id: row.try_get("plugin_id")?,
            kind: row.try_get("kind")?,
            base_image: row.try_get("base_image")?,
            build_local_image: row.try_get("build_local_image")?,
            build_time: row.try_get("build_time")?,
            repo: row.try_get("repo")?,
            git_url: row.try_get("git_url")?,
            info: row.try_get("info")?,
            status: row.try_get("status")?,
            container_cpu: row.try_get("container_cpu")?,
            container_memory: row.try_get("container_memory")?,
            container_cmd: row.try_get("container_cmd")?,
        })
    }
}

pub(crate) async fn insert_build_version<'e, E>(
    executor: E,
    v: &PluginBuildVersion,
) -> ExecutorResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tenant_plugin_build_version
            (version_id, deploy_version, plugin_id, kind, base_image, build_local_image,
             build_time, repo, git_url, info, status, container_cpu, container_memory, container_cmd)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(&v.version_id)
    .bind(&v.deploy_version)
    .bind(&v.plugin_id)
    .bind(&v.kind)
    .bind(&v.base_image)
    .bind(&v.build_local_image)
    .bind(&v.build_time)
    .bind(&v.repo)
    .bind(&v.git_url)
    .bind(&v.info)
    .bind(&v.status)
    .bind(v.container_cpu)
    .bind(v.container_memory)
    .bind(&v.container_cmd)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl PluginBuildRepository for SqlitePluginBuildRepository {
    #[instrument(skip(self, version), fields(plugin_id = %version.plugin_id))]
    async fn create(&self, version: &PluginBuildVersion) -> ExecutorResult<()> {
        insert_build_version(&self.pool, version).await
    }

    async fn get(
        &self,
        plugin_id: &str,
        deploy_version: &str,
    ) -> ExecutorResult<Option<PluginBuildVersion>> {
        let row = sqlx::query(
            "SELECT * FROM tenant_plugin_build_version WHERE plugin_id = $1 AND deploy_version = $2",
        )
        .bind(plugin_id)
        .bind(deploy_version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_build_version).transpose()
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        plugin_id: &str,
        deploy_version: &str,
        status: &str,
        build_local_image: &str,
    ) -> ExecutorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_plugin_build_version
            SET status = $1,
                build_local_image = CASE WHEN $2 = '' THEN build_local_image ELSE $2 END
            WHERE plugin_id = $3 AND deploy_version = $4
            "#,
        )
        .bind(status)
        .bind(build_local_image)
        .bind(plugin_id)
        .bind(deploy_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutorError::not_found(
                "tenant_plugin_build_version",
                format!("{plugin_id}/{deploy_version}"),
            ));
        }
        debug!("插件 {} 构建版本 {} 状态更新为 {}", plugin_id, deploy_version, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use executor_domain::{PLUGIN_STATUS_BUILDING, PLUGIN_STATUS_COMPLETE};

    #[tokio::test]
    async fn test_update_status_keeps_image_when_empty() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqlitePluginBuildRepository::new(db.pool().clone());

        repo.create(&PluginBuildVersion {
            plugin_id: "p1".into(),
            deploy_version: "v1".into(),
            status: PLUGIN_STATUS_BUILDING.into(),
            ..Default::default()
        })
        .await
        .unwrap();

        repo.update_status("p1", "v1", PLUGIN_STATUS_BUILDING, "goodrain.me/plugin:v1")
            .await
            .unwrap();
        repo.update_status("p1", "v1", PLUGIN_STATUS_COMPLETE, "")
            .await
            .unwrap();

        let stored = repo.get("p1", "v1").await.unwrap().unwrap();
        assert_eq!(stored.status, PLUGIN_STATUS_COMPLETE);
        assert_eq!(stored.build_local_image, "goodrain.me/plugin:v1");

        assert!(repo.update_status("p1", "missing", "failure", "").await.is_err());
    }
}
