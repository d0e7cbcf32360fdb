//! 快照测试数据构造器

use executor_domain::{
    AppBackup, BackupStatus, LbMappingPort, MountRelation, RegionServiceSnapshot, ServiceEnvVar,
    ServiceLabel, ServicePort, ServiceProbe, ServiceRelation, ServiceVolume, VersionInfo,
    DELIVERED_IMAGE, DELIVERED_SLUG, FINAL_STATUS_SUCCESS, SOURCE_TYPE_LOCAL, SOURCE_TYPE_S3,
    SOURCE_TYPE_SFTP, STATEFUL_LABEL_KEY, STATEFUL_LABEL_VALUE,
};

/// 构造一个所有子记录都指向自身的组件快照
pub struct SnapshotBuilder {
    snapshot: RegionServiceSnapshot,
}

impl SnapshotBuilder {
    pub fn new(service_id: &str) -> Self {
        let mut snapshot = RegionServiceSnapshot {
            service_id: service_id.to_string(),
            status: "running".to_string(),
            ..Default::default()
        };
        snapshot.service.service_id = service_id.to_string();
        snapshot.service.tenant_id = "tenant-old".to_string();
        snapshot.service.service_alias = format!("gr{}", tail(service_id, 6));
        snapshot.service.service_name = service_id.to_string();
        snapshot.service.deploy_version = "20240101000000".to_string();
        snapshot.service.extend_method = "stateless".to_string();
        snapshot.service.replicas = 1;
        Self { snapshot }
    }

    fn sid(&self) -> String {
        self.snapshot.service_id.clone()
    }

    pub fn tenant(mut self, tenant_id: &str) -> Self {
        self.snapshot.service.tenant_id = tenant_id.to_string();
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.snapshot.service.service_alias = alias.to_string();
        self
    }

    pub fn deploy_version(mut self, version: &str) -> Self {
        self.snapshot.service.deploy_version = version.to_string();
        self
    }

    pub fn extend_method(mut self, method: &str) -> Self {
        self.snapshot.service.extend_method = method.to_string();
        self
    }

    pub fn stateful(mut self) -> Self {
        let sid = self.sid();
        self.snapshot.labels.push(ServiceLabel {
            service_id: sid,
            label_key: STATEFUL_LABEL_KEY.to_string(),
            label_value: STATEFUL_LABEL_VALUE.to_string(),
            ..Default::default()
        });
        self
    }

    fn version(&self, delivered_type: &str, delivered_path: &str) -> VersionInfo {
        VersionInfo {
            build_version: self.snapshot.service.deploy_version.clone(),
            event_id: format!("event-{}", self.snapshot.service_id),
            service_id: self.sid(),
            kind: "build_from_source_code".to_string(),
            delivered_type: delivered_type.to_string(),
            delivered_path: delivered_path.to_string(),
            final_status: FINAL_STATUS_SUCCESS.to_string(),
            ..Default::default()
        }
    }

    /// 当前部署版本以 slug 交付
    pub fn slug_version(mut self, slug_path: &str) -> Self {
        let version = self.version(DELIVERED_SLUG, slug_path);
        self.snapshot.versions.push(version);
        self
    }

    /// 当前部署版本以镜像交付
    pub fn image_version(mut self, image: &str) -> Self {
        let mut version = self.version(DELIVERED_IMAGE, image);
        version.image_name = image.to_string();
        self.snapshot.versions.push(version);
        self
    }

    pub fn volume(mut self, name: &str, volume_type: &str, host_path: &str, volume_path: &str) -> Self {
        let sid = self.sid();
        let id = self.snapshot.volumes.len() as i64 + 1;
        self.snapshot.volumes.push(ServiceVolume {
            id,
            service_id: sid,
            category: "app".to_string(),
            volume_type: volume_type.to_string(),
            volume_name: name.to_string(),
            host_path: host_path.to_string(),
            volume_path: volume_path.to_string(),
            is_read_only: false,
        });
        self
    }

    pub fn mounts(mut self, dep_service_id: &str, volume_name: &str) -> Self {
        let sid = self.sid();
        let tenant_id = self.snapshot.service.tenant_id.clone();
        self.snapshot.mount_relations.push(MountRelation {
            tenant_id,
            service_id: sid,
            dep_service_id: dep_service_id.to_string(),
            volume_path: format!("/mnt/{volume_name}"),
            host_path: String::new(),
            volume_name: volume_name.to_string(),
            volume_type: "share-file".to_string(),
            ..Default::default()
        });
        self
    }

    pub fn depends_on(mut self, dep_service_id: &str) -> Self {
        let sid = self.sid();
        let tenant_id = self.snapshot.service.tenant_id.clone();
        self.snapshot.relations.push(ServiceRelation {
            tenant_id,
            service_id: sid,
            dep_service_id: dep_service_id.to_string(),
            dep_service_type: "application".to_string(),
            dep_order: 0,
            ..Default::default()
        });
        self
    }

    pub fn lb_port(mut self, port: i64, container_port: i32) -> Self {
        let sid = self.sid();
        self.snapshot.lb_mapping_ports.push(LbMappingPort {
            service_id: sid,
            port,
            container_port,
            ..Default::default()
        });
        self
    }

    pub fn port(mut self, container_port: i32) -> Self {
        let sid = self.sid();
        let tenant_id = self.snapshot.service.tenant_id.clone();
        self.snapshot.ports.push(ServicePort {
            tenant_id,
            service_id: sid,
            container_port,
            mapping_port: container_port,
            protocol: "http".to_string(),
            port_alias: format!("PORT{container_port}"),
            is_inner_service: true,
            ..Default::default()
        });
        self
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        let sid = self.sid();
        let tenant_id = self.snapshot.service.tenant_id.clone();
        self.snapshot.envs.push(ServiceEnvVar {
            tenant_id,
            service_id: sid,
            name: name.to_string(),
            attr_name: name.to_string(),
            attr_value: value.to_string(),
            scope: "inner".to_string(),
            ..Default::default()
        });
        self
    }

    pub fn probe(mut self, port: i32) -> Self {
        let sid = self.sid();
        self.snapshot.probes.push(ServiceProbe {
            service_id: sid,
            probe_id: format!("probe-{port}"),
            mode: "readiness".to_string(),
            scheme: "tcp".to_string(),
            port,
            is_used: 1,
            ..Default::default()
        });
        self
    }

    pub fn build(self) -> RegionServiceSnapshot {
        self.snapshot
    }
}

fn tail(value: &str, n: usize) -> &str {
    let start = value.len().saturating_sub(n);
    value.get(start..).unwrap_or(value)
}

/// 已成功的备份记录
pub fn successful_backup(backup_id: &str, group_id: &str, mode: &str, source_dir: &str) -> AppBackup {
    let mut backup = AppBackup::new(backup_id, group_id);
    backup.status = BackupStatus::Success;
    backup.backup_mode = mode.to_string();
    backup.source_dir = source_dir.to_string();
    backup.source_type = match mode {
        "full-online" if source_dir.starts_with("s3://") => SOURCE_TYPE_S3,
        "full-online" => SOURCE_TYPE_SFTP,
        _ => SOURCE_TYPE_LOCAL,
    }
    .to_string();
    backup.version = "v1".to_string();
    backup
}
