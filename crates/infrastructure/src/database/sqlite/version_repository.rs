use async_trait::async_trait;
use executor_domain::{VersionInfo, VersionRepository};
use executor_errors::ExecutorResult;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteVersionRepository {
    pool: SqlitePool,
}

impl SqliteVersionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> ExecutorResult<VersionInfo> {
        Ok(VersionInfo {
            id: row.try_get("id")?,
            build_version: row.try_get("build_version")?,
            event_id: row.try_get("event_id")?,
            service_id: row.try_get("service_id")?,
            kind: row.try_get("kind")?,
            delivered_type: row.try_get("delivered_type")?,
            delivered_path: row.try_get("delivered_path")?,
            image_name: row.try_get("image_name")?,
            cmd: row.try_get("cmd")?,
            repo_url: row.try_get("repo_url")?,
            code_version: row.try_get("code_version")?,
            code_branch: row.try_get("code_branch")?,
            commit_msg: row.try_get("commit_msg")?,
            author: row.try_get("author")?,
            final_status: row.try_get("final_status")?,
            finish_time: row.try_get("finish_time")?,
        })
    }
}

/// 连接池和回放事务共用的插入语句
pub(crate) async fn insert_version<'e, E>(executor: E, v: &VersionInfo) -> ExecutorResult<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tenant_service_version
            (build_version, event_id, service_id, kind, delivered_type, delivered_path,
             image_name, cmd, repo_url, code_version, code_branch, commit_msg, author,
             final_status, finish_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(&v.build_version)
    .bind(&v.event_id)
    .bind(&v.service_id)
    .bind(&v.kind)
    .bind(&v.delivered_type)
    .bind(&v.delivered_path)
    .bind(&v.image_name)
    .bind(&v.cmd)
    .bind(&v.repo_url)
    .bind(&v.code_version)
    .bind(&v.code_branch)
    .bind(&v.commit_msg)
    .bind(&v.author)
    .bind(&v.final_status)
    .bind(&v.finish_time)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl VersionRepository for SqliteVersionRepository {
    #[instrument(skip(self, version), fields(service_id = %version.service_id))]
    async fn create(&self, version: &VersionInfo) -> ExecutorResult<()> {
        insert_version(&self.pool, version).await?;
        debug!("创建构建版本: {} {}", version.service_id, version.build_version);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_event_id(&self, event_id: &str) -> ExecutorResult<Option<VersionInfo>> {
        let row = sqlx::query(
            "SELECT * FROM tenant_service_version WHERE event_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        service_id: &str,
        build_version: &str,
    ) -> ExecutorResult<Option<VersionInfo>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM tenant_service_version
            WHERE service_id = $1 AND build_version = $2
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(service_id)
        .bind(build_version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    #[instrument(skip(self, version), fields(event_id = %version.event_id))]
    async fn upsert(&self, version: &VersionInfo) -> ExecutorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_service_version
            SET build_version = $1, kind = $2, delivered_type = $3, delivered_path = $4,
                image_name = $5, cmd = $6, repo_url = $7, code_version = $8, code_branch = $9,
                commit_msg = $10, author = $11, final_status = $12, finish_time = $13
            WHERE event_id = $14
            "#,
        )
        .bind(&version.build_version)
        .bind(&version.kind)
        .bind(&version.delivered_type)
        .bind(&version.delivered_path)
        .bind(&version.image_name)
        .bind(&version.cmd)
        .bind(&version.repo_url)
        .bind(&version.code_version)
        .bind(&version.code_branch)
        .bind(&version.commit_msg)
        .bind(&version.author)
        .bind(&version.final_status)
        .bind(&version.finish_time)
        .bind(&version.event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            insert_version(&self.pool, version).await?;
        }
        Ok(())
    }
}
