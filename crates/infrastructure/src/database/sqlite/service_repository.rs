use async_trait::async_trait;
use executor_domain::{
    LbMappingPort, MetadataTx, MountRelation, PluginBuildVersion, PluginRelation,
    ServiceConfigFile, ServiceEnvVar, ServiceLabel, ServicePort, ServiceProbe, ServiceRelation,
    ServiceRepository, ServiceVolume, TenantPlugin, TenantService, VersionInfo,
};
use executor_errors::{ExecutorError, ExecutorResult};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument, warn};

use crate::database::schema::{LB_PORT_MAX, LB_PORT_MIN, SERVICE_CHILD_TABLES};

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> ExecutorResult<TenantService> {
        Ok(TenantService {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            service_id: row.try_get("service_id")?,
            service_key: row.try_get("service_key")?,
            service_alias: row.try_get("service_alias")?,
            service_name: row.try_get("service_name")?,
            comment: row.try_get("comment")?,
            service_version: row.try_get("service_version")?,
            image_name: row.try_get("image_name")?,
            container_cpu: row.try_get("container_cpu")?,
            container_memory: row.try_get("container_memory")?,
            container_cmd: row.try_get("container_cmd")?,
            extend_method: row.try_get("extend_method")?,
            replicas: row.try_get("replicas")?,
            deploy_version: row.try_get("deploy_version")?,
            category: row.try_get("category")?,
            cur_status: row.try_get("cur_status")?,
            service_type: row.try_get("service_type")?,
            namespace: row.try_get("namespace")?,
            service_origin: row.try_get("service_origin")?,
            kind: row.try_get("kind")?,
        })
    }
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn begin(&self) -> ExecutorResult<Box<dyn MetadataTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteMetadataTx { tx }))
    }

    #[instrument(skip(self))]
    async fn get_service(&self, service_id: &str) -> ExecutorResult<Option<TenantService>> {
        let row = sqlx::query("SELECT * FROM tenant_services WHERE service_id = $1")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_service).transpose()
    }

    #[instrument(skip(self))]
    async fn update_deploy_version(
        &self,
        service_id: &str,
        deploy_version: &str,
    ) -> ExecutorResult<()> {
        let result =
            sqlx::query("UPDATE tenant_services SET deploy_version = $1 WHERE service_id = $2")
                .bind(deploy_version)
                .bind(service_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ExecutorError::not_found("tenant_services", service_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_service_cascade(&self, service_id: &str) -> ExecutorResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        for table in SERVICE_CHILD_TABLES {
            let sql = format!("DELETE FROM {table} WHERE service_id = $1");
            removed += sqlx::query(&sql)
                .bind(service_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        removed += sqlx::query("DELETE FROM tenant_services WHERE service_id = $1")
            .bind(service_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        debug!("删除组件 {} 及其子记录共 {} 行", service_id, removed);
        Ok(())
    }
}

/// 元数据回放事务, drop 时未提交的写入自动回滚
pub struct SqliteMetadataTx {
    tx: Transaction<'static, Sqlite>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl MetadataTx for SqliteMetadataTx {
    async fn insert_service(&mut self, s: &TenantService) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services
                (tenant_id, service_id, service_key, service_alias, service_name, comment,
                 service_version, image_name, container_cpu, container_memory, container_cmd,
                 extend_method, replicas, deploy_version, category, cur_status, service_type,
                 namespace, service_origin, kind)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(&s.tenant_id)
        .bind(&s.service_id)
        .bind(&s.service_key)
        .bind(&s.service_alias)
        .bind(&s.service_name)
        .bind(&s.comment)
        .bind(&s.service_version)
        .bind(&s.image_name)
        .bind(s.container_cpu)
        .bind(s.container_memory)
        .bind(&s.container_cmd)
        .bind(&s.extend_method)
        .bind(s.replicas)
        .bind(&s.deploy_version)
        .bind(&s.category)
        .bind(&s.cur_status)
        .bind(&s.service_type)
        .bind(&s.namespace)
        .bind(&s.service_origin)
        .bind(&s.kind)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_probe(&mut self, p: &ServiceProbe) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services_probe
                (service_id, probe_id, mode, scheme, path, port, cmd, http_header,
                 initial_delay_second, period_second, timeout_second, is_used,
                 failure_threshold, success_threshold)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&p.service_id)
        .bind(&p.probe_id)
        .bind(&p.mode)
        .bind(&p.scheme)
        .bind(&p.path)
        .bind(p.port)
        .bind(&p.cmd)
        .bind(&p.http_header)
        .bind(p.initial_delay_second)
        .bind(p.period_second)
        .bind(p.timeout_second)
        .bind(p.is_used)
        .bind(p.failure_threshold)
        .bind(p.success_threshold)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_lb_mapping_port(&mut self, p: &LbMappingPort) -> ExecutorResult<()> {
        let result = sqlx::query(
            "INSERT INTO tenant_lb_mapping_port (service_id, port, container_port) VALUES ($1, $2, $3)",
        )
        .bind(&p.service_id)
        .bind(p.port)
        .bind(p.container_port)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            // SQLite 只回滚冲突的那条语句, 事务仍可继续使用
            Err(e) if is_unique_violation(&e) => Err(ExecutorError::LbPortConflict { port: p.port }),
            Err(e) => Err(e.into()),
        }
    }

    async fn allocate_lb_mapping_port(&mut self) -> ExecutorResult<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(port) FROM tenant_lb_mapping_port")
            .fetch_one(&mut *self.tx)
            .await?;

        let candidate = match max {
            Some(max) if max >= LB_PORT_MIN => max + 1,
            _ => LB_PORT_MIN,
        };
        if candidate <= LB_PORT_MAX {
            return Ok(candidate);
        }

        // 端口段顶部已被占满, 从低位寻找空洞
        let used: Vec<i64> = sqlx::query_scalar(
            "SELECT port FROM tenant_lb_mapping_port WHERE port BETWEEN $1 AND $2 ORDER BY port",
        )
        .bind(LB_PORT_MIN)
        .bind(LB_PORT_MAX)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut expected = LB_PORT_MIN;
        for port in used {
            if port > expected {
                break;
            }
            expected = port + 1;
        }
        if expected > LB_PORT_MAX {
            warn!("负载均衡端口已耗尽");
            return Err(ExecutorError::DatabaseOperation(
                "没有可分配的负载均衡端口".to_string(),
            ));
        }
        Ok(expected)
    }

    async fn insert_env(&mut self, e: &ServiceEnvVar) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services_envs
                (tenant_id, service_id, container_port, name, attr_name, attr_value, is_change, scope)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&e.tenant_id)
        .bind(&e.service_id)
        .bind(e.container_port)
        .bind(&e.name)
        .bind(&e.attr_name)
        .bind(&e.attr_value)
        .bind(e.is_change)
        .bind(&e.scope)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_label(&mut self, l: &ServiceLabel) -> ExecutorResult<()> {
        sqlx::query(
            "INSERT INTO tenant_services_label (service_id, label_key, label_value) VALUES ($1, $2, $3)",
        )
        .bind(&l.service_id)
        .bind(&l.label_key)
        .bind(&l.label_value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_mount_relation(&mut self, m: &MountRelation) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services_mnt_relation
                (tenant_id, service_id, dep_service_id, mnt_name, mnt_dir, volume_name, volume_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&m.tenant_id)
        .bind(&m.service_id)
        .bind(&m.dep_service_id)
        .bind(&m.volume_path)
        .bind(&m.host_path)
        .bind(&m.volume_name)
        .bind(&m.volume_type)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_plugin_relation(&mut self, r: &PluginRelation) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_service_plugin_relation
                (plugin_id, service_id, version_id, plugin_model, container_cpu, container_memory, switch)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&r.plugin_id)
        .bind(&r.service_id)
        .bind(&r.version_id)
        .bind(&r.plugin_model)
        .bind(r.container_cpu)
        .bind(r.container_memory)
        .bind(r.switch)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_relation(&mut self, r: &ServiceRelation) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services_relation
                (tenant_id, service_id, dep_service_id, dep_service_type, dep_order)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&r.tenant_id)
        .bind(&r.service_id)
        .bind(&r.dep_service_id)
        .bind(&r.dep_service_type)
        .bind(r.dep_order)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_volume(&mut self, v: &ServiceVolume) -> ExecutorResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenant_services_volume
                (service_id, category, volume_type, volume_name, host_path, volume_path, is_read_only)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&v.service_id)
        .bind(&v.category)
        .bind(&v.volume_type)
        .bind(&v.volume_name)
        .bind(&v.host_path)
        .bind(&v.volume_path)
        .bind(v.is_read_only)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_config_file(&mut self, f: &ServiceConfigFile) -> ExecutorResult<()> {
        sqlx::query(
            "INSERT INTO tenant_service_config_file (service_id, volume_name, file_content) VALUES ($1, $2, $3)",
        )
        .bind(&f.service_id)
        .bind(&f.volume_name)
        .bind(&f.file_content)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_port(&mut self, p: &ServicePort) -> ExecutorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_services_port
                (tenant_id, service_id, container_port, mapping_port, protocol, port_alias,
                 is_inner_service, is_outer_service)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&p.tenant_id)
        .bind(&p.service_id)
        .bind(p.container_port)
        .bind(p.mapping_port)
        .bind(&p.protocol)
        .bind(&p.port_alias)
        .bind(p.is_inner_service)
        .bind(p.is_outer_service)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_version(&mut self, v: &VersionInfo) -> ExecutorResult<()> {
        super::version_repository::insert_version(&mut *self.tx, v).await
    }

    async fn insert_plugin(&mut self, p: &TenantPlugin) -> ExecutorResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenant_plugin
                (plugin_id, tenant_id, plugin_name, plugin_info, image_url, git_url, build_model, plugin_model)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&p.plugin_id)
        .bind(&p.tenant_id)
        .bind(&p.plugin_name)
        .bind(&p.plugin_info)
        .bind(&p.image_url)
        .bind(&p.git_url)
        .bind(&p.build_model)
        .bind(&p.plugin_model)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_plugin_build_version(
        &mut self,
        v: &PluginBuildVersion,
    ) -> ExecutorResult<bool> {
        match super::plugin_build_repository::insert_build_version(&mut *self.tx, v).await {
            Ok(()) => Ok(true),
            Err(ExecutorError::Database(e)) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn commit(self: Box<Self>) -> ExecutorResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ExecutorResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    async fn count(pool: &SqlitePool, table: &str, service_id: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE service_id = $1"))
            .bind(service_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn service(id: &str) -> TenantService {
        TenantService {
            tenant_id: "t1".to_string(),
            service_id: id.to_string(),
            service_alias: format!("gr{}", &id[id.len().saturating_sub(6)..]),
            ..TenantService::default()
        }
    }

    #[tokio::test]
    async fn test_commit_persists_and_cascade_delete_removes_everything() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());

        let mut tx = repo.begin().await.unwrap();
        tx.insert_service(&service("svc000001")).await.unwrap();
        tx.insert_port(&ServicePort {
            service_id: "svc000001".into(),
            container_port: 80,
            ..Default::default()
        })
        .await
        .unwrap();
        tx.insert_lb_mapping_port(&LbMappingPort {
            service_id: "svc000001".into(),
            port: 20001,
            container_port: 80,
            ..Default::default()
        })
        .await
        .unwrap();
        tx.insert_version(&VersionInfo {
            service_id: "svc000001".into(),
            build_version: "v1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(repo.get_service("svc000001").await.unwrap().is_some());
        assert_eq!(count(db.pool(), "tenant_lb_mapping_port", "svc000001").await, 1);

        repo.delete_service_cascade("svc000001").await.unwrap();
        assert!(repo.get_service("svc000001").await.unwrap().is_none());
        for table in SERVICE_CHILD_TABLES {
            assert_eq!(count(db.pool(), table, "svc000001").await, 0);
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());

        {
            let mut tx = repo.begin().await.unwrap();
            tx.insert_service(&service("svc000002")).await.unwrap();
        }

        assert!(repo.get_service("svc000002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lb_port_conflict_keeps_transaction_usable() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());

        let mut tx = repo.begin().await.unwrap();
        let taken = LbMappingPort {
            service_id: "a".into(),
            port: 20010,
            container_port: 80,
            ..Default::default()
        };
        tx.insert_lb_mapping_port(&taken).await.unwrap();

        let err = tx
            .insert_lb_mapping_port(&LbMappingPort {
                service_id: "b".into(),
                ..taken.clone()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::LbPortConflict { port: 20010 }));

        let port = tx.allocate_lb_mapping_port().await.unwrap();
        assert_eq!(port, 20011);
        tx.insert_lb_mapping_port(&LbMappingPort {
            service_id: "b".into(),
            port,
            container_port: 80,
            ..Default::default()
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(count(db.pool(), "tenant_lb_mapping_port", "b").await, 1);
    }

    #[tokio::test]
    async fn test_allocate_starts_at_floor_and_fills_gaps_when_top_is_taken() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());
        let mut tx = repo.begin().await.unwrap();

        assert_eq!(tx.allocate_lb_mapping_port().await.unwrap(), LB_PORT_MIN);

        for port in [LB_PORT_MIN, LB_PORT_MIN + 1, LB_PORT_MAX] {
            tx.insert_lb_mapping_port(&LbMappingPort {
                service_id: "x".into(),
                port,
                ..Default::default()
            })
            .await
            .unwrap();
        }
        assert_eq!(tx.allocate_lb_mapping_port().await.unwrap(), LB_PORT_MIN + 2);
    }

    #[tokio::test]
    async fn test_duplicate_plugin_is_ignored() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());
        let mut tx = repo.begin().await.unwrap();

        let plugin = TenantPlugin {
            plugin_id: "p1".into(),
            tenant_id: "t1".into(),
            ..Default::default()
        };
        assert!(tx.insert_plugin(&plugin).await.unwrap());
        assert!(!tx.insert_plugin(&plugin).await.unwrap());

        let build = PluginBuildVersion {
            plugin_id: "p1".into(),
            deploy_version: "v1".into(),
            ..Default::default()
        };
        assert!(tx.insert_plugin_build_version(&build).await.unwrap());
        assert!(!tx.insert_plugin_build_version(&build).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_deploy_version() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let repo = SqliteServiceRepository::new(db.pool().clone());
        let mut tx = repo.begin().await.unwrap();
        tx.insert_service(&service("svc000003")).await.unwrap();
        tx.commit().await.unwrap();

        repo.update_deploy_version("svc000003", "20240101").await.unwrap();
        let svc = repo.get_service("svc000003").await.unwrap().unwrap();
        assert_eq!(svc.deploy_version, "20240101");

        assert!(repo.update_deploy_version("missing", "v").await.is_err());
    }
}
