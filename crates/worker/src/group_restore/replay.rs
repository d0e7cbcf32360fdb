//! 元数据回放
//!
//! 所有组件在同一个事务里写入, 任何一条记录失败都整体回滚。

use std::collections::{BTreeMap, HashMap};

use executor_config::StorageConfig;
use executor_domain::{
    AppSnapshot, ExecutorResult, MetadataTx, RegionServiceSnapshot, ResultExt, ServiceChange,
    ServiceRepository, VolumeType,
};
use tracing::{debug, info, warn};

/// 存储卷在新租户和新组件下的宿主机路径
pub fn assign_host_paths(service: &mut RegionServiceSnapshot, storage: &StorageConfig) {
    let tenant_id = service.service.tenant_id.clone();
    let service_id = service.service_id.clone();
    for volume in service.volumes.iter_mut() {
        let volume_type = match VolumeType::parse(&volume.volume_type) {
            Some(t) => t,
            None => {
                warn!(
                    volume = %volume.volume_name,
                    volume_type = %volume.volume_type,
                    "未知的存储卷类型, 按共享存储处理"
                );
                volume.volume_type = VolumeType::ShareFile.as_str().to_string();
                VolumeType::ShareFile
            }
        };
        let root = match volume_type {
            VolumeType::ShareFile => &storage.share_data_path,
            VolumeType::Local => &storage.local_data_path,
            VolumeType::MemoryFs | VolumeType::ConfigFile => continue,
        };
        volume.host_path = format!(
            "{}/tenant/{}/service/{}{}",
            root.trim_end_matches('/'),
            tenant_id,
            service_id,
            volume.volume_path
        );
    }
}

/// 在一个事务中写入全部组件, 返回 旧存储卷ID -> 新存储卷ID
///
/// 负载均衡端口冲突时重新分配, 并把 旧端口 -> 新端口 记录到对应的 ServiceChange。
pub async fn replay(
    repository: &dyn ServiceRepository,
    snapshot: &mut AppSnapshot,
    storage: &StorageConfig,
    changes: &mut BTreeMap<String, ServiceChange>,
) -> ExecutorResult<HashMap<i64, i64>> {
    for service in snapshot.services.iter_mut() {
        assign_host_paths(service, storage);
    }

    let new_to_old: HashMap<String, String> = changes
        .iter()
        .map(|(old, change)| (change.service_id.clone(), old.clone()))
        .collect();

    let mut tx = repository.begin().await?;
    let result = insert_all(tx.as_mut(), snapshot, changes, &new_to_old).await;
    match result {
        Ok(volume_ids) => {
            tx.commit().await.context("提交元数据事务失败")?;
            info!(services = snapshot.services.len(), "元数据回放完成");
            Ok(volume_ids)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("回滚元数据事务失败: {rollback_err}");
            }
            Err(e)
        }
    }
}

async fn insert_all(
    tx: &mut dyn MetadataTx,
    snapshot: &mut AppSnapshot,
    changes: &mut BTreeMap<String, ServiceChange>,
    new_to_old: &HashMap<String, String>,
) -> ExecutorResult<HashMap<i64, i64>> {
    let mut volume_ids = HashMap::new();

    for service in snapshot.services.iter_mut() {
        let sid = service.service_id.clone();
        let change = new_to_old.get(&sid).and_then(|old| changes.get_mut(old));
        insert_service(tx, service, change, &mut volume_ids)
            .await
            .with_context(|| format!("写入组件 {} 失败", service.service.service_alias))?;
    }

    for plugin in &snapshot.plugins {
        let mut record = plugin.clone();
        record.id = 0;
        if !tx.insert_plugin(&record).await? {
            debug!(plugin_id = %plugin.plugin_id, "插件已存在");
        }
    }
    for version in &snapshot.plugin_build_versions {
        let mut record = version.clone();
        record.id = 0;
        if !tx.insert_plugin_build_version(&record).await? {
            debug!(plugin_id = %version.plugin_id, deploy_version = %version.deploy_version, "插件构建版本已存在");
        }
    }

    Ok(volume_ids)
}

async fn insert_service(
    tx: &mut dyn MetadataTx,
    service: &mut RegionServiceSnapshot,
    mut change: Option<&mut ServiceChange>,
    volume_ids: &mut HashMap<i64, i64>,
) -> ExecutorResult<()> {
    let mut record = service.service.clone();
    record.id = 0;
    tx.insert_service(&record).await?;

    for probe in &service.probes {
        let mut record = probe.clone();
        record.id = 0;
        tx.insert_probe(&record).await.context("写入健康检查")?;
    }

    for port in service.lb_mapping_ports.iter_mut() {
        port.id = 0;
        match tx.insert_lb_mapping_port(port).await {
            Ok(()) => {}
            Err(e) if e.is_lb_port_conflict() => {
                let old_port = port.port;
                let new_port = tx.allocate_lb_mapping_port().await?;
                port.port = new_port;
                tx.insert_lb_mapping_port(port).await.context("写入负载均衡端口")?;
                info!(service_id = %port.service_id, old_port, new_port, "负载均衡端口冲突, 已重新分配");
                if let Some(change) = change.as_deref_mut() {
                    change.lb_ports.insert(old_port, new_port);
                }
            }
            Err(e) => return Err(e),
        }
    }

    for env in &service.envs {
        let mut record = env.clone();
        record.id = 0;
        tx.insert_env(&record).await.context("写入环境变量")?;
    }
    for label in &service.labels {
        let mut record = label.clone();
        record.id = 0;
        tx.insert_label(&record).await.context("写入标签")?;
    }
    for mount in &service.mount_relations {
        let mut record = mount.clone();
        record.id = 0;
        tx.insert_mount_relation(&record).await.context("写入存储挂载关系")?;
    }
    // 插件关系暂不恢复, 只在内存中完成了重映射
    if !service.plugin_relations.is_empty() {
        debug!(
            service_id = %service.service_id,
            count = service.plugin_relations.len(),
            "跳过插件关系"
        );
    }
    for relation in &service.relations {
        let mut record = relation.clone();
        record.id = 0;
        tx.insert_relation(&record).await.context("写入依赖关系")?;
    }
    for volume in &service.volumes {
        let mut record = volume.clone();
        record.id = 0;
        let new_id = tx.insert_volume(&record).await.context("写入存储卷")?;
        volume_ids.insert(volume.id, new_id);
    }
    for file in &service.config_files {
        let mut record = file.clone();
        record.id = 0;
        tx.insert_config_file(&record).await.context("写入配置文件")?;
    }
    for port in &service.ports {
        let mut record = port.clone();
        record.id = 0;
        tx.insert_port(&record).await.context("写入端口")?;
    }
    for version in &service.versions {
        let mut record = version.clone();
        record.id = 0;
        tx.insert_version(&record).await.context("写入构建版本")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_testing_utils::SnapshotBuilder;

    #[test]
    fn test_host_paths_follow_volume_type() {
        let storage = StorageConfig::rooted_at("/r");
        let mut service = SnapshotBuilder::new("svc")
            .tenant("t1")
            .volume("share", "share-file", "/old/share", "/data")
            .volume("local", "local", "/old/local", "/var/lib")
            .volume("mem", "memoryfs", "/old/mem", "/cache")
            .volume("odd", "ceph-rbd", "/old/odd", "/odd")
            .build();

        assign_host_paths(&mut service, &storage);
        assert_eq!(service.volumes[0].host_path, "/r/grdata/tenant/t1/service/svc/data");
        assert_eq!(service.volumes[1].host_path, "/r/grlocaldata/tenant/t1/service/svc/var/lib");
        assert_eq!(service.volumes[2].host_path, "/old/mem");
        assert_eq!(service.volumes[3].volume_type, "share-file");
        assert_eq!(service.volumes[3].host_path, "/r/grdata/tenant/t1/service/svc/odd");
    }
}
