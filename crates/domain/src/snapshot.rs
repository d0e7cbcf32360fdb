//! 组应用快照模型
//!
//! 字段命名与平台元数据文件保持兼容: 快照外层使用 PascalCase,
//! 各子记录沿用数据表列名。

use executor_errors::{ExecutorError, ExecutorResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantService {
    #[serde(rename = "ID")]
    pub id: i64,
    pub tenant_id: String,
    pub service_id: String,
    pub service_key: String,
    pub service_alias: String,
    pub service_name: String,
    pub comment: String,
    pub service_version: String,
    pub image_name: String,
    pub container_cpu: i32,
    pub container_memory: i32,
    pub container_cmd: String,
    pub extend_method: String,
    pub replicas: i32,
    pub deploy_version: String,
    pub category: String,
    pub cur_status: String,
    pub service_type: String,
    pub namespace: String,
    pub service_origin: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceProbe {
    #[serde(rename = "ID")]
    pub id: i64,
    pub service_id: String,
    pub probe_id: String,
    pub mode: String,
    pub scheme: String,
    pub path: String,
    pub port: i32,
    pub cmd: String,
    pub http_header: String,
    pub initial_delay_second: i32,
    pub period_second: i32,
    pub timeout_second: i32,
    pub is_used: i32,
    pub failure_threshold: i32,
    pub success_threshold: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbMappingPort {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "ServiceID", alias = "service_id")]
    pub service_id: String,
    #[serde(rename = "Port", alias = "port")]
    pub port: i64,
    #[serde(rename = "ContainerPort", alias = "container_port")]
    pub container_port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEnvVar {
    #[serde(rename = "ID")]
    pub id: i64,
    pub tenant_id: String,
    pub service_id: String,
    pub container_port: i32,
    pub name: String,
    pub attr_name: String,
    pub attr_value: String,
    pub is_change: bool,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLabel {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "ServiceID", alias = "service_id")]
    pub service_id: String,
    #[serde(rename = "LabelKey", alias = "label_key")]
    pub label_key: String,
    #[serde(rename = "LabelValue", alias = "label_value")]
    pub label_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountRelation {
    #[serde(rename = "ID")]
    pub id: i64,
    pub tenant_id: String,
    pub service_id: String,
    pub dep_service_id: String,
    pub volume_path: String,
    pub host_path: String,
    pub volume_name: String,
    pub volume_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginRelation {
    #[serde(rename = "ID")]
    pub id: i64,
    pub plugin_id: String,
    pub service_id: String,
    pub version_id: String,
    pub plugin_model: String,
    pub container_cpu: i32,
    pub container_memory: i32,
    pub switch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRelation {
    #[serde(rename = "ID")]
    pub id: i64,
    pub tenant_id: String,
    pub service_id: String,
    #[serde(alias = "depend_service_id")]
    pub dep_service_id: String,
    pub dep_service_type: String,
    pub dep_order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceVolume {
    #[serde(rename = "ID")]
    pub id: i64,
    pub service_id: String,
    pub category: String,
    pub volume_type: String,
    pub volume_name: String,
    pub host_path: String,
    pub volume_path: String,
    pub is_read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfigFile {
    #[serde(rename = "ID")]
    pub id: i64,
    pub service_id: String,
    pub volume_name: String,
    pub file_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePort {
    #[serde(rename = "ID")]
    pub id: i64,
    pub tenant_id: String,
    pub service_id: String,
    pub container_port: i32,
    pub mapping_port: i32,
    pub protocol: String,
    pub port_alias: String,
    pub is_inner_service: bool,
    pub is_outer_service: bool,
}

/// 一次构建产物
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    #[serde(rename = "ID")]
    pub id: i64,
    pub build_version: String,
    pub event_id: String,
    pub service_id: String,
    pub kind: String,
    /// slug 或 image
    pub delivered_type: String,
    /// slug 文件路径或镜像名
    pub delivered_path: String,
    pub image_name: String,
    pub cmd: String,
    pub repo_url: String,
    pub code_version: String,
    pub code_branch: String,
    pub commit_msg: String,
    pub author: String,
    /// success / failure / lost
    pub final_status: String,
    pub finish_time: String,
}

pub const DELIVERED_SLUG: &str = "slug";
pub const DELIVERED_IMAGE: &str = "image";
pub const FINAL_STATUS_SUCCESS: &str = "success";
pub const FINAL_STATUS_FAILURE: &str = "failure";
pub const FINAL_STATUS_LOST: &str = "lost";

impl VersionInfo {
    pub fn is_restorable(&self) -> bool {
        self.final_status == FINAL_STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPlugin {
    #[serde(rename = "ID")]
    pub id: i64,
    pub plugin_id: String,
    pub tenant_id: String,
    pub plugin_name: String,
    pub plugin_info: String,
    pub image_url: String,
    pub git_url: String,
    pub build_model: String,
    pub plugin_model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginBuildVersion {
    #[serde(rename = "ID")]
    pub id: i64,
    pub version_id: String,
    pub deploy_version: String,
    pub plugin_id: String,
    pub kind: String,
    pub base_image: String,
    pub build_local_image: String,
    pub build_time: String,
    pub repo: String,
    pub git_url: String,
    pub info: String,
    /// building / complete / failure
    pub status: String,
    pub container_cpu: i32,
    pub container_memory: i32,
    pub container_cmd: String,
}

pub const PLUGIN_STATUS_BUILDING: &str = "building";
pub const PLUGIN_STATUS_COMPLETE: &str = "complete";
pub const PLUGIN_STATUS_FAILURE: &str = "failure";

/// 单个组件在备份时刻的完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionServiceSnapshot {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "Service")]
    pub service: TenantService,
    #[serde(rename = "ServiceProbe")]
    pub probes: Vec<ServiceProbe>,
    #[serde(rename = "LBMappingPort")]
    pub lb_mapping_ports: Vec<LbMappingPort>,
    #[serde(rename = "ServiceEnv")]
    pub envs: Vec<ServiceEnvVar>,
    #[serde(rename = "ServiceLabel")]
    pub labels: Vec<ServiceLabel>,
    #[serde(rename = "ServiceMntRelation")]
    pub mount_relations: Vec<MountRelation>,
    #[serde(rename = "ServiceRelation")]
    pub relations: Vec<ServiceRelation>,
    #[serde(rename = "ServiceStatus")]
    pub status: String,
    #[serde(rename = "ServiceVolume")]
    pub volumes: Vec<ServiceVolume>,
    #[serde(rename = "ServiceConfigFile")]
    pub config_files: Vec<ServiceConfigFile>,
    #[serde(rename = "ServicePort")]
    pub ports: Vec<ServicePort>,
    #[serde(rename = "Versions")]
    pub versions: Vec<VersionInfo>,
    #[serde(rename = "PluginRelation")]
    pub plugin_relations: Vec<PluginRelation>,
}

pub const STATEFUL_LABEL_KEY: &str = "service-type";
pub const STATEFUL_LABEL_VALUE: &str = "StatefulServiceType";

impl RegionServiceSnapshot {
    /// 从后往前找与当前部署版本一致的构建记录
    pub fn deployed_version(&self) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.build_version == self.service.deploy_version)
    }

    pub fn deployed_version_mut(&mut self) -> Option<&mut VersionInfo> {
        let deploy_version = self.service.deploy_version.clone();
        self.versions
            .iter_mut()
            .rev()
            .find(|v| v.build_version == deploy_version)
    }

    pub fn is_stateful(&self) -> bool {
        let method = self.service.extend_method.as_str();
        (method.starts_with("state") && !method.starts_with("stateless"))
            || self
                .labels
                .iter()
                .any(|l| l.label_key == STATEFUL_LABEL_KEY && l.label_value == STATEFUL_LABEL_VALUE)
    }

    /// 检查所有子记录的外键是否都指向自身
    pub fn check_child_ownership(&self) -> ExecutorResult<()> {
        let sid = self.service_id.as_str();
        let owners = std::iter::once(self.service.service_id.as_str())
            .chain(self.probes.iter().map(|r| r.service_id.as_str()))
            .chain(self.lb_mapping_ports.iter().map(|r| r.service_id.as_str()))
            .chain(self.envs.iter().map(|r| r.service_id.as_str()))
            .chain(self.labels.iter().map(|r| r.service_id.as_str()))
            .chain(self.mount_relations.iter().map(|r| r.service_id.as_str()))
            .chain(self.relations.iter().map(|r| r.service_id.as_str()))
            .chain(self.volumes.iter().map(|r| r.service_id.as_str()))
            .chain(self.config_files.iter().map(|r| r.service_id.as_str()))
            .chain(self.ports.iter().map(|r| r.service_id.as_str()))
            .chain(self.versions.iter().map(|r| r.service_id.as_str()))
            .chain(self.plugin_relations.iter().map(|r| r.service_id.as_str()));

        for owner in owners {
            if owner != sid {
                return Err(ExecutorError::validation_error(format!(
                    "组件 {sid} 的子记录引用了其他组件 {owner}"
                )));
            }
        }
        Ok(())
    }
}

/// 存储卷类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    ShareFile,
    Local,
    MemoryFs,
    ConfigFile,
}

impl VolumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::ShareFile => "share-file",
            VolumeType::Local => "local",
            VolumeType::MemoryFs => "memoryfs",
            VolumeType::ConfigFile => "config-file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "share-file" => Some(VolumeType::ShareFile),
            "local" => Some(VolumeType::Local),
            "memoryfs" => Some(VolumeType::MemoryFs),
            "config-file" => Some(VolumeType::ConfigFile),
            _ => None,
        }
    }

    /// memoryfs 和 config-file 不在宿主机上保存数据
    pub fn has_host_data(&self) -> bool {
        matches!(self, VolumeType::ShareFile | VolumeType::Local)
    }
}

/// 元数据文件的两种格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataFormat {
    /// 组件快照数组
    Legacy,
    /// 包含组件、插件及插件构建版本的对象
    #[default]
    Current,
}

/// 一个组的全部快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppSnapshot {
    pub services: Vec<RegionServiceSnapshot>,
    pub plugins: Vec<TenantPlugin>,
    pub plugin_build_versions: Vec<PluginBuildVersion>,
    pub format: MetadataFormat,
}

#[derive(Serialize, Deserialize)]
struct AppSnapshotDocument {
    #[serde(rename = "Services", default)]
    services: Vec<RegionServiceSnapshot>,
    #[serde(rename = "Plugins", default)]
    plugins: Vec<TenantPlugin>,
    #[serde(rename = "PluginBuildVersions", default)]
    plugin_build_versions: Vec<PluginBuildVersion>,
}

impl AppSnapshot {
    pub fn from_services(services: Vec<RegionServiceSnapshot>) -> Self {
        Self {
            services,
            ..Self::default()
        }
    }

    pub fn from_metadata(data: &str) -> ExecutorResult<Self> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ExecutorError::Serialization(format!("元数据不是合法的JSON: {e}")))?;

        if value.is_array() {
            let services: Vec<RegionServiceSnapshot> = serde_json::from_value(value)?;
            return Ok(Self {
                services,
                format: MetadataFormat::Legacy,
                ..Self::default()
            });
        }

        let doc: AppSnapshotDocument = serde_json::from_value(value)?;
        Ok(Self {
            services: doc.services,
            plugins: doc.plugins,
            plugin_build_versions: doc.plugin_build_versions,
            format: MetadataFormat::Current,
        })
    }

    pub fn to_metadata(&self) -> ExecutorResult<String> {
        let data = match self.format {
            MetadataFormat::Legacy => serde_json::to_string(&self.services)?,
            MetadataFormat::Current => serde_json::to_string(&AppSnapshotDocument {
                services: self.services.clone(),
                plugins: self.plugins.clone(),
                plugin_build_versions: self.plugin_build_versions.clone(),
            })?,
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version(build_version: &str, final_status: &str) -> VersionInfo {
        VersionInfo {
            build_version: build_version.to_string(),
            final_status: final_status.to_string(),
            ..VersionInfo::default()
        }
    }

    #[test]
    fn test_legacy_metadata_array_is_accepted() {
        let data = json!([{
            "ServiceID": "s1",
            "Service": {"service_id": "s1", "service_alias": "gr000001", "deploy_version": "v2"},
            "LBMappingPort": [{"ServiceID": "s1", "Port": 20001, "ContainerPort": 80}],
            "ServiceLabel": [{"ServiceID": "s1", "LabelKey": "service-type", "LabelValue": "StatefulServiceType"}],
            "Versions": [{"build_version": "v2", "delivered_type": "slug", "final_status": "success"}]
        }])
        .to_string();

        let snapshot = AppSnapshot::from_metadata(&data).unwrap();
        assert_eq!(snapshot.format, MetadataFormat::Legacy);
        assert_eq!(snapshot.services.len(), 1);
        let svc = &snapshot.services[0];
        assert_eq!(svc.lb_mapping_ports[0].port, 20001);
        assert!(svc.is_stateful());
        assert_eq!(svc.deployed_version().unwrap().delivered_type, DELIVERED_SLUG);

        let written = snapshot.to_metadata().unwrap();
        assert!(written.starts_with('['));
    }

    #[test]
    fn test_current_metadata_object_is_accepted() {
        let data = json!({
            "Services": [{"ServiceID": "s1", "Service": {"service_id": "s1"}}],
            "Plugins": [{"plugin_id": "p1", "tenant_id": "t1"}],
            "PluginBuildVersions": [{"plugin_id": "p1", "deploy_version": "20240101"}]
        })
        .to_string();

        let snapshot = AppSnapshot::from_metadata(&data).unwrap();
        assert_eq!(snapshot.format, MetadataFormat::Current);
        assert_eq!(snapshot.plugins[0].plugin_id, "p1");
        assert_eq!(snapshot.plugin_build_versions[0].deploy_version, "20240101");

        let written: serde_json::Value =
            serde_json::from_str(&snapshot.to_metadata().unwrap()).unwrap();
        assert!(written.get("Services").is_some());
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        assert!(AppSnapshot::from_metadata("not json").is_err());
        assert!(AppSnapshot::from_metadata("42").is_err());
    }

    #[test]
    fn test_deployed_version_prefers_most_recent_match() {
        let mut snapshot = RegionServiceSnapshot::default();
        snapshot.service.deploy_version = "v1".to_string();
        let mut older = version("v1", "failure");
        older.event_id = "old".to_string();
        let mut newer = version("v1", "success");
        newer.event_id = "new".to_string();
        snapshot.versions = vec![older, version("v0", "success"), newer];

        assert_eq!(snapshot.deployed_version().unwrap().event_id, "new");

        snapshot.service.deploy_version = "v9".to_string();
        assert!(snapshot.deployed_version().is_none());
    }

    #[test]
    fn test_stateful_detection() {
        let mut snapshot = RegionServiceSnapshot::default();
        snapshot.service.extend_method = "stateless_multiple".to_string();
        assert!(!snapshot.is_stateful());

        snapshot.service.extend_method = "state_singleton".to_string();
        assert!(snapshot.is_stateful());
    }

    #[test]
    fn test_child_ownership_check() {
        let mut snapshot = RegionServiceSnapshot {
            service_id: "s1".to_string(),
            ..Default::default()
        };
        snapshot.service.service_id = "s1".to_string();
        snapshot.ports.push(ServicePort {
            service_id: "s1".to_string(),
            ..Default::default()
        });
        assert!(snapshot.check_child_ownership().is_ok());

        snapshot.envs.push(ServiceEnvVar {
            service_id: "s2".to_string(),
            ..Default::default()
        });
        assert!(snapshot.check_child_ownership().is_err());
    }

    #[test]
    fn test_volume_type_parsing() {
        assert_eq!(VolumeType::parse("share-file"), Some(VolumeType::ShareFile));
        assert_eq!(VolumeType::parse("ceph-rbd"), None);
        assert!(!VolumeType::ConfigFile.has_host_data());
        assert!(VolumeType::Local.has_host_data());
    }
}
