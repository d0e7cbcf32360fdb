//! 数据仓储抽象

use async_trait::async_trait;
use executor_errors::ExecutorResult;

use crate::backup::AppBackup;
use crate::snapshot::{
    LbMappingPort, MountRelation, PluginBuildVersion, PluginRelation, ServiceConfigFile,
    ServiceEnvVar, ServiceLabel, ServicePort, ServiceProbe, ServiceRelation, ServiceVolume,
    TenantPlugin, TenantService, VersionInfo,
};

#[async_trait]
pub trait AppBackupRepository: Send + Sync {
    async fn create(&self, backup: &AppBackup) -> ExecutorResult<()>;
    async fn get(&self, backup_id: &str) -> ExecutorResult<Option<AppBackup>>;
    async fn update(&self, backup: &AppBackup) -> ExecutorResult<()>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// 开启元数据回放事务
    async fn begin(&self) -> ExecutorResult<Box<dyn MetadataTx>>;
    async fn get_service(&self, service_id: &str) -> ExecutorResult<Option<TenantService>>;
    async fn update_deploy_version(&self, service_id: &str, deploy_version: &str)
        -> ExecutorResult<()>;
    /// 删除组件及其全部子记录
    async fn delete_service_cascade(&self, service_id: &str) -> ExecutorResult<()>;
}

/// 一次元数据回放使用的事务句柄, 未提交即丢弃时回滚
#[async_trait]
pub trait MetadataTx: Send {
    async fn insert_service(&mut self, service: &TenantService) -> ExecutorResult<()>;
    async fn insert_probe(&mut self, probe: &ServiceProbe) -> ExecutorResult<()>;
    /// 端口已被占用时返回 `LbPortConflict`, 事务仍然可用
    async fn insert_lb_mapping_port(&mut self, port: &LbMappingPort) -> ExecutorResult<()>;
    async fn allocate_lb_mapping_port(&mut self) -> ExecutorResult<i64>;
    async fn insert_env(&mut self, env: &ServiceEnvVar) -> ExecutorResult<()>;
    async fn insert_label(&mut self, label: &ServiceLabel) -> ExecutorResult<()>;
    async fn insert_mount_relation(&mut self, relation: &MountRelation) -> ExecutorResult<()>;
    async fn insert_plugin_relation(&mut self, relation: &PluginRelation) -> ExecutorResult<()>;
    async fn insert_relation(&mut self, relation: &ServiceRelation) -> ExecutorResult<()>;
    /// 返回新记录的自增ID
    async fn insert_volume(&mut self, volume: &ServiceVolume) -> ExecutorResult<i64>;
    async fn insert_config_file(&mut self, file: &ServiceConfigFile) -> ExecutorResult<()>;
    async fn insert_port(&mut self, port: &ServicePort) -> ExecutorResult<()>;
    async fn insert_version(&mut self, version: &VersionInfo) -> ExecutorResult<()>;
    /// 已存在时返回 false
    async fn insert_plugin(&mut self, plugin: &TenantPlugin) -> ExecutorResult<bool>;
    /// 已存在时返回 false
    async fn insert_plugin_build_version(
        &mut self,
        version: &PluginBuildVersion,
    ) -> ExecutorResult<bool>;
    async fn commit(self: Box<Self>) -> ExecutorResult<()>;
    async fn rollback(self: Box<Self>) -> ExecutorResult<()>;
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn create(&self, version: &VersionInfo) -> ExecutorResult<()>;
    async fn get_by_event_id(&self, event_id: &str) -> ExecutorResult<Option<VersionInfo>>;
    async fn get(&self, service_id: &str, build_version: &str)
        -> ExecutorResult<Option<VersionInfo>>;
    /// 按 event_id 更新, 没有对应记录时插入
    async fn upsert(&self, version: &VersionInfo) -> ExecutorResult<()>;
}

#[async_trait]
pub trait PluginBuildRepository: Send + Sync {
    async fn create(&self, version: &PluginBuildVersion) -> ExecutorResult<()>;
    async fn get(
        &self,
        plugin_id: &str,
        deploy_version: &str,
    ) -> ExecutorResult<Option<PluginBuildVersion>>;
    async fn update_status(
        &self,
        plugin_id: &str,
        deploy_version: &str,
        status: &str,
        build_local_image: &str,
    ) -> ExecutorResult<()>;
}
