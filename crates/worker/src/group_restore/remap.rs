//! 组件身份重映射
//!
//! 分两步进行: 先为每个组件分配新ID并改写自身及子记录, 再在所有新ID确定后
//! 改写跨组件的依赖引用。依赖可能指向尚未处理的组件, 所以两步不能合并。

use std::collections::{BTreeMap, HashSet};

use executor_domain::{
    AppSnapshot, ExecutorError, ExecutorResult, ImageName, RegionServiceSnapshot, ServiceChange,
    DELIVERED_IMAGE, DELIVERED_SLUG,
};

use crate::bundle;

/// 恢复目标环境
#[derive(Debug, Clone)]
pub struct RemapTarget {
    pub tenant_id: String,
    pub registry_domain: String,
    pub slug_root: String,
}

pub fn new_service_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// "gr" + 新ID的后6位
pub fn derive_alias(service_id: &str) -> String {
    let start = service_id.len().saturating_sub(6);
    format!("gr{}", service_id.get(start..).unwrap_or(service_id))
}

pub fn normalize_extend_method(method: &str) -> String {
    match method {
        "state" => "state_multiple".to_string(),
        "stateless" => "stateless_multiple".to_string(),
        other => other.to_string(),
    }
}

pub fn remap(snapshot: &mut AppSnapshot, target: &RemapTarget) -> ExecutorResult<BTreeMap<String, ServiceChange>> {
    remap_with(snapshot, target, new_service_id)
}

/// `next_id` 产生候选ID, 与旧ID或已分配ID重复时重新生成
pub fn remap_with<F>(
    snapshot: &mut AppSnapshot,
    target: &RemapTarget,
    mut next_id: F,
) -> ExecutorResult<BTreeMap<String, ServiceChange>>
where
    F: FnMut() -> String,
{
    let mut old_ids = HashSet::new();
    for service in &snapshot.services {
        service.check_child_ownership()?;
        if !old_ids.insert(service.service_id.clone()) {
            return Err(ExecutorError::validation_error(format!(
                "元数据中组件 {} 重复出现",
                service.service_id
            )));
        }
    }

    // 第一步: 分配新ID并改写组件自身
    let mut issued = HashSet::new();
    let mut changes = BTreeMap::new();
    for service in snapshot.services.iter_mut() {
        let new_id = loop {
            let candidate = next_id();
            if !candidate.is_empty() && !old_ids.contains(&candidate) && !issued.contains(&candidate) {
                break candidate;
            }
        };
        issued.insert(new_id.clone());

        let old_id = service.service_id.clone();
        let alias = derive_alias(&new_id);
        rewrite_service(service, &new_id, &alias, target);
        changes.insert(
            old_id,
            ServiceChange {
                service_id: new_id,
                service_alias: alias,
                status: service.status.clone(),
                lb_ports: BTreeMap::new(),
            },
        );
    }

    // 第二步: 改写跨组件依赖
    for service in snapshot.services.iter_mut() {
        let owner = service.service_id.clone();
        for mount in service.mount_relations.iter_mut() {
            mount.dep_service_id = resolve(&changes, &owner, &mount.dep_service_id)?;
        }
        for relation in service.relations.iter_mut() {
            relation.dep_service_id = resolve(&changes, &owner, &relation.dep_service_id)?;
        }
    }

    for plugin in snapshot.plugins.iter_mut() {
        plugin.tenant_id = target.tenant_id.clone();
    }
    for version in snapshot.plugin_build_versions.iter_mut() {
        if !version.build_local_image.is_empty() {
            version.build_local_image =
                ImageName::rewrite_domain(&version.build_local_image, &target.registry_domain);
        }
    }

    Ok(changes)
}

fn resolve(changes: &BTreeMap<String, ServiceChange>, owner: &str, old_dep: &str) -> ExecutorResult<String> {
    changes
        .get(old_dep)
        .map(|c| c.service_id.clone())
        .ok_or_else(|| {
            ExecutorError::validation_error(format!(
                "组件 {owner} 依赖的组件 {old_dep} 不在备份中"
            ))
        })
}

fn rewrite_service(service: &mut RegionServiceSnapshot, new_id: &str, alias: &str, target: &RemapTarget) {
    let tenant_id = target.tenant_id.as_str();

    service.service_id = new_id.to_string();
    service.service.service_id = new_id.to_string();
    service.service.service_alias = alias.to_string();
    service.service.service_name = alias.to_string();
    service.service.tenant_id = tenant_id.to_string();
    service.service.extend_method = normalize_extend_method(&service.service.extend_method);

    for probe in service.probes.iter_mut() {
        probe.service_id = new_id.to_string();
    }
    for port in service.lb_mapping_ports.iter_mut() {
        port.service_id = new_id.to_string();
    }
    for env in service.envs.iter_mut() {
        env.service_id = new_id.to_string();
        env.tenant_id = tenant_id.to_string();
    }
    for label in service.labels.iter_mut() {
        label.service_id = new_id.to_string();
    }
    for mount in service.mount_relations.iter_mut() {
        mount.service_id = new_id.to_string();
        mount.tenant_id = tenant_id.to_string();
    }
    for relation in service.plugin_relations.iter_mut() {
        relation.service_id = new_id.to_string();
    }
    for relation in service.relations.iter_mut() {
        relation.service_id = new_id.to_string();
        relation.tenant_id = tenant_id.to_string();
    }
    for volume in service.volumes.iter_mut() {
        volume.service_id = new_id.to_string();
    }
    for file in service.config_files.iter_mut() {
        file.service_id = new_id.to_string();
    }
    for port in service.ports.iter_mut() {
        port.service_id = new_id.to_string();
        port.tenant_id = tenant_id.to_string();
    }
    for version in service.versions.iter_mut() {
        version.service_id = new_id.to_string();
        match version.delivered_type.as_str() {
            DELIVERED_IMAGE => {
                version.delivered_path =
                    ImageName::rewrite_domain(&version.delivered_path, &target.registry_domain);
                if !version.image_name.is_empty() {
                    version.image_name =
                        ImageName::rewrite_domain(&version.image_name, &target.registry_domain);
                }
            }
            DELIVERED_SLUG => {
                version.delivered_path = bundle::slug_delivered_path(
                    &target.slug_root,
                    tenant_id,
                    new_id,
                    &version.build_version,
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_testing_utils::SnapshotBuilder;

    fn target() -> RemapTarget {
        RemapTarget {
            tenant_id: "tenant-new".to_string(),
            registry_domain: "goodrain.me".to_string(),
            slug_root: "/grdata/build/tenant".to_string(),
        }
    }

    fn sequence(ids: &[&str]) -> impl FnMut() -> String {
        let mut ids: Vec<String> = ids.iter().rev().map(|s| s.to_string()).collect();
        move || ids.pop().unwrap_or_default()
    }

    #[test]
    fn test_alias_and_extend_method() {
        assert_eq!(derive_alias("0123456789abcdef"), "grabcdef");
        assert_eq!(derive_alias("abc"), "grabc");
        assert_eq!(normalize_extend_method("state"), "state_multiple");
        assert_eq!(normalize_extend_method("stateless"), "stateless_multiple");
        assert_eq!(normalize_extend_method("state_singleton"), "state_singleton");
    }

    #[test]
    fn test_children_follow_new_identity() {
        let mut snapshot = AppSnapshot::from_services(vec![SnapshotBuilder::new("old-a")
            .extend_method("stateless")
            .port(80)
            .env("DB_HOST", "db")
            .lb_port(20001, 80)
            .volume("data", "share-file", "/grdata/x", "/data")
            .image_version("old.hub:5000/old-a:20240101000000")
            .build()]);

        let changes = remap_with(&mut snapshot, &target(), sequence(&["new-a-000001"])).unwrap();

        let change = &changes["old-a"];
        assert_eq!(change.service_id, "new-a-000001");
        assert_eq!(change.service_alias, "gr000001");

        let svc = &snapshot.services[0];
        assert_eq!(svc.service.service_alias, "gr000001");
        assert_eq!(svc.service.tenant_id, "tenant-new");
        assert_eq!(svc.service.extend_method, "stateless_multiple");
        assert!(svc.check_child_ownership().is_ok());
        assert_eq!(svc.ports[0].tenant_id, "tenant-new");
        assert_eq!(svc.envs[0].tenant_id, "tenant-new");
        assert_eq!(
            svc.versions[0].delivered_path,
            "goodrain.me/old-a:20240101000000"
        );
    }

    #[test]
    fn test_slug_versions_point_to_new_location() {
        let mut snapshot = AppSnapshot::from_services(vec![SnapshotBuilder::new("old-a")
            .slug_version("/grdata/build/tenant/tenant-old/slug/old-a/20240101000000.tgz")
            .build()]);

        remap_with(&mut snapshot, &target(), sequence(&["fresh"])).unwrap();
        assert_eq!(
            snapshot.services[0].versions[0].delivered_path,
            "/grdata/build/tenant/tenant-new/slug/fresh/20240101000000.tgz"
        );
    }

    #[test]
    fn test_colliding_ids_are_regenerated() {
        let mut snapshot = AppSnapshot::from_services(vec![
            SnapshotBuilder::new("a").build(),
            SnapshotBuilder::new("b").build(),
        ]);

        // "b" 是旧ID, 第二个 "x" 已分配给 a
        let changes =
            remap_with(&mut snapshot, &target(), sequence(&["b", "x", "x", "y"])).unwrap();
        assert_eq!(changes["a"].service_id, "x");
        assert_eq!(changes["b"].service_id, "y");
    }

    #[test]
    fn test_dependencies_resolved_in_second_pass() {
        // a 依赖排在后面的 b
        let mut snapshot = AppSnapshot::from_services(vec![
            SnapshotBuilder::new("a").mounts("b", "shared").depends_on("b").build(),
            SnapshotBuilder::new("b").build(),
        ]);

        let changes = remap_with(&mut snapshot, &target(), sequence(&["na", "nb"])).unwrap();
        let a = &snapshot.services[0];
        assert_eq!(a.mount_relations[0].dep_service_id, changes["b"].service_id);
        assert_eq!(a.relations[0].dep_service_id, "nb");
        assert_eq!(a.mount_relations[0].tenant_id, "tenant-new");
    }

    #[test]
    fn test_unresolved_dependency_is_rejected() {
        let mut snapshot = AppSnapshot::from_services(vec![SnapshotBuilder::new("a")
            .depends_on("missing")
            .build()]);

        let err = remap(&mut snapshot, &target()).unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));
    }

    #[test]
    fn test_duplicate_service_is_rejected() {
        let mut snapshot = AppSnapshot::from_services(vec![
            SnapshotBuilder::new("a").build(),
            SnapshotBuilder::new("a").build(),
        ]);
        assert!(remap(&mut snapshot, &target()).is_err());
    }
}
