mod common;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::{drive, task, Harness};
use executor_domain::{
    restore_result_key, AppSnapshot, RegionServiceSnapshot, BACKUP_APPS_RESTORE,
};
use executor_infrastructure::archive;
use executor_testing_utils::{successful_backup, SnapshotBuilder};
use executor_worker::{bundle, GroupRestoreWorker};
use serde_json::json;

const OLD_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const OLD_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const BUILD: &str = "20240101000000";

fn service_a() -> RegionServiceSnapshot {
    SnapshotBuilder::new(OLD_A)
        .slug_version("/old/grdata/build/tenant/tenant-old/slug/a/20240101000000.tgz")
        .volume("data", "share-file", "/old/grdata/tenant/tenant-old/service/a/data", "/data")
        .lb_port(20001, 80)
        .port(80)
        .env("MODE", "prod")
        .probe(80)
        .build()
}

fn service_b() -> RegionServiceSnapshot {
    SnapshotBuilder::new(OLD_B)
        .image_version("goodrain.me/app-b:1.0")
        .mounts(OLD_A, "data")
        .depends_on(OLD_A)
        .build()
}

/// 在本地目录中写出一个离线备份包
async fn write_bundle(h: &Harness, services: Vec<RegionServiceSnapshot>) -> PathBuf {
    let root = h.path("backups/g1_v1");
    std::fs::create_dir_all(&root).unwrap();
    let metadata = AppSnapshot::from_services(services).to_metadata().unwrap();
    std::fs::write(root.join(bundle::METADATA_FILE), metadata).unwrap();

    let slug = bundle::slug_file(&root, OLD_A, BUILD);
    std::fs::create_dir_all(slug.parent().unwrap()).unwrap();
    std::fs::write(&slug, b"slug-bytes").unwrap();

    let image = bundle::image_file(&root, OLD_B, BUILD);
    std::fs::create_dir_all(image.parent().unwrap()).unwrap();
    std::fs::write(&image, b"image-tar").unwrap();
    h.images.set_loaded_images(vec!["goodrain.me/app-b:1.0".to_string()]);

    let volume_src = h.path("volume-src/data");
    std::fs::create_dir_all(&volume_src).unwrap();
    std::fs::write(volume_src.join("db.txt"), b"rows").unwrap();
    let volume_zip = bundle::volume_archive(&root, OLD_A, "data");
    std::fs::create_dir_all(volume_zip.parent().unwrap()).unwrap();
    archive::zip_dir(&volume_src, &volume_zip).unwrap();

    let backup = successful_backup("backup-1", "g1", "full-offline", &root.to_string_lossy());
    h.ctx.backups.create(&backup).await.unwrap();
    root
}

fn restore_worker(h: &Harness) -> GroupRestoreWorker {
    let message = task(
        BACKUP_APPS_RESTORE,
        json!({
            "backup_id": "backup-1",
            "tenant_id": "tenant-new",
            "restore_id": "restore-1",
            "restore_mode": "cdct",
            "event_id": "event-restore"
        }),
    );
    GroupRestoreWorker::new(h.ctx.clone(), &message).unwrap()
}

async fn new_ids(h: &Harness) -> Vec<String> {
    sqlx::query_scalar("SELECT service_id FROM tenant_services WHERE tenant_id = 'tenant-new'")
        .fetch_all(h.db.pool())
        .await
        .unwrap()
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn test_offline_restore_remaps_and_places_data() {
    let h = Harness::new().await;
    write_bundle(&h, vec![service_a(), service_b()]).await;
    let mut worker = restore_worker(&h);

    drive(&mut worker).await.unwrap();

    let result = h.results.get_json(&restore_result_key("restore-1")).unwrap();
    assert_eq!(result["status"], "success");
    let new_a = result["service_change"][OLD_A]["ServiceID"].as_str().unwrap().to_string();
    let new_b = result["service_change"][OLD_B]["ServiceID"].as_str().unwrap().to_string();
    assert_ne!(new_a, OLD_A);
    assert_ne!(new_b, OLD_B);
    assert_ne!(new_a, new_b);
    assert_eq!(
        result["service_change"][OLD_A]["ServiceAlias"],
        format!("gr{}", &new_a[new_a.len() - 6..])
    );

    let ids: HashSet<String> = new_ids(&h).await.into_iter().collect();
    assert_eq!(ids, HashSet::from([new_a.clone(), new_b.clone()]));

    // 挂载和依赖关系指向新的组件ID
    let mount_dep: String = sqlx::query_scalar(
        "SELECT dep_service_id FROM tenant_services_mnt_relation WHERE service_id = $1",
    )
    .bind(&new_b)
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(mount_dep, new_a);
    let relation_dep: String = sqlx::query_scalar(
        "SELECT dep_service_id FROM tenant_services_relation WHERE service_id = $1",
    )
    .bind(&new_b)
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(relation_dep, new_a);
    assert_eq!(h.count_for("tenant_services_envs", &new_a).await, 1);
    assert_eq!(h.count_for("tenant_services_probe", &new_a).await, 1);
    assert_eq!(h.count_for("tenant_services_port", &new_a).await, 1);
    assert_eq!(h.count_for("tenant_lb_mapping_port", &new_a).await, 1);

    let storage = &h.ctx.storage;
    let slug = PathBuf::from(bundle::slug_delivered_path(
        &storage.slug_root,
        "tenant-new",
        &new_a,
        BUILD,
    ));
    assert_eq!(std::fs::read(&slug).unwrap(), b"slug-bytes");

    let host_path = PathBuf::from(format!(
        "{}/tenant/tenant-new/service/{}/data",
        storage.share_data_path, new_a
    ));
    assert_eq!(std::fs::read(host_path.join("db.txt")).unwrap(), b"rows");
    let stored_host: String =
        sqlx::query_scalar("SELECT host_path FROM tenant_services_volume WHERE service_id = $1")
            .bind(&new_a)
            .fetch_one(h.db.pool())
            .await
            .unwrap();
    assert_eq!(PathBuf::from(stored_host), host_path);

    assert!(h.images.calls_for("push").contains(&"goodrain.me/app-b:1.0".to_string()));
    assert!(h.transfers.remote_calls().is_empty());
    assert!(!exists(worker.cache_dir()));

    let logger = h.loggers.get("event-restore");
    assert!(logger.contains_message("恢复成功"));
}

#[tokio::test]
async fn test_restore_ids_are_fresh_and_distinct() {
    let h = Harness::new().await;
    let old_ids: Vec<String> = (0..5).map(|i| format!("{i:0>32}")).collect();
    let services = old_ids
        .iter()
        .map(|id| SnapshotBuilder::new(id).build())
        .collect();
    write_bundle(&h, services).await;
    let mut worker = restore_worker(&h);

    drive(&mut worker).await.unwrap();

    let changes = worker.service_change();
    assert_eq!(changes.len(), 5);
    let new: HashSet<&str> = changes.values().map(|c| c.service_id.as_str()).collect();
    assert_eq!(new.len(), 5);
    for old in &old_ids {
        assert!(!new.contains(old.as_str()));
        assert!(changes.contains_key(old));
    }
    assert_eq!(new_ids(&h).await.len(), 5);
}

#[tokio::test]
async fn test_lb_port_conflict_is_reallocated() {
    let h = Harness::new().await;
    sqlx::query("INSERT INTO tenant_lb_mapping_port (service_id, port, container_port) VALUES ('other', 20001, 8080)")
        .execute(h.db.pool())
        .await
        .unwrap();
    write_bundle(&h, vec![service_a(), service_b()]).await;
    let mut worker = restore_worker(&h);

    drive(&mut worker).await.unwrap();

    let change = &worker.service_change()[OLD_A];
    assert_eq!(change.lb_ports.get(&20001), Some(&20002));
    let port: i64 = sqlx::query_scalar("SELECT port FROM tenant_lb_mapping_port WHERE service_id = $1")
        .bind(&change.service_id)
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(port, 20002);

    let result = h.results.get_json(&restore_result_key("restore-1")).unwrap();
    assert_eq!(result["service_change"][OLD_A]["LBPorts"]["20001"], 20002);
}

#[tokio::test]
async fn test_failed_replay_writes_nothing() {
    let h = Harness::new().await;
    let broken = SnapshotBuilder::new(OLD_B)
        .env("DUP", "1")
        .env("DUP", "2")
        .build();
    write_bundle(&h, vec![service_a(), broken]).await;
    let mut worker = restore_worker(&h);

    assert!(drive(&mut worker).await.is_err());

    assert_eq!(h.count("SELECT COUNT(*) FROM tenant_services").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM tenant_services_envs").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM tenant_lb_mapping_port").await, 0);
    let result = h.results.get_json(&restore_result_key("restore-1")).unwrap();
    assert_eq!(result["status"], "failed");
}

#[tokio::test]
async fn test_artifact_failure_rolls_back_services_and_cache() {
    let h = Harness::new().await;
    let root = write_bundle(&h, vec![service_a(), service_b()]).await;
    std::fs::remove_file(bundle::slug_file(&root, OLD_A, BUILD)).unwrap();
    let mut worker = restore_worker(&h);

    let err = drive(&mut worker).await.unwrap_err();
    assert!(err.to_string().contains("slug"), "{err}");

    assert!(new_ids(&h).await.is_empty());
    assert_eq!(h.count("SELECT COUNT(*) FROM tenant_services_mnt_relation").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM tenant_services_volume").await, 0);
    assert!(!exists(worker.cache_dir()));

    let result = h.results.get_json(&restore_result_key("restore-1")).unwrap();
    assert_eq!(result["status"], "failed");
    let logger = h.loggers.get("event-restore");
    assert!(logger.has_event("callback", executor_domain::StepStatus::Failure));
}

#[tokio::test]
async fn test_deleted_backup_is_not_restorable() {
    let h = Harness::new().await;
    write_bundle(&h, vec![service_a()]).await;
    let mut backup = h.ctx.backups.get("backup-1").await.unwrap().unwrap();
    backup.deleted = true;
    h.ctx.backups.update(&backup).await.unwrap();
    let mut worker = restore_worker(&h);

    assert!(drive(&mut worker).await.is_err());
    assert!(new_ids(&h).await.is_empty());
}

#[tokio::test]
async fn test_historical_version_push_failure_aborts_restore() {
    let h = Harness::new().await;
    let service = SnapshotBuilder::new(OLD_B)
        .image_version("goodrain.me/app-b:0.9")
        .deploy_version("20240202000000")
        .image_version("goodrain.me/app-b:1.0")
        .build();
    let root = write_bundle(&h, vec![service]).await;
    let current = bundle::image_file(&root, OLD_B, "20240202000000");
    std::fs::write(&current, b"image-tar").unwrap();
    h.images.fail_next("push", 1);
    let mut worker = restore_worker(&h);

    let err = drive(&mut worker).await.unwrap_err();
    assert!(err.to_string().contains(BUILD), "{err}");

    assert!(new_ids(&h).await.is_empty());
    let result = h.results.get_json(&restore_result_key("restore-1")).unwrap();
    assert_eq!(result["status"], "failed");
}

#[tokio::test]
async fn test_missing_historical_artifact_is_skipped() {
    let h = Harness::new().await;
    let service = SnapshotBuilder::new(OLD_B)
        .image_version("goodrain.me/app-b:0.9")
        .deploy_version("20240202000000")
        .image_version("goodrain.me/app-b:1.0")
        .build();
    let root = write_bundle(&h, vec![service]).await;
    std::fs::remove_file(bundle::image_file(&root, OLD_B, BUILD)).unwrap();
    std::fs::write(bundle::image_file(&root, OLD_B, "20240202000000"), b"image-tar").unwrap();
    let mut worker = restore_worker(&h);

    drive(&mut worker).await.unwrap();
    assert_eq!(h.images.calls_for("load").len(), 1);
}

#[tokio::test]
async fn test_service_data_archive_is_preferred() {
    let h = Harness::new().await;
    let root = write_bundle(&h, vec![service_a()]).await;
    let all_src = h.path("all-src").join(OLD_A);
    std::fs::create_dir_all(all_src.join("data")).unwrap();
    std::fs::write(all_src.join("data/db.txt"), b"all-rows").unwrap();
    std::fs::write(all_src.join("data/extra.txt"), b"extra").unwrap();
    archive::zip_dir(&all_src, &bundle::all_data_archive(&root, OLD_A)).unwrap();
    let mut worker = restore_worker(&h);

    drive(&mut worker).await.unwrap();

    let new_a = worker.service_change()[OLD_A].service_id.clone();
    let host_path = PathBuf::from(format!(
        "{}/tenant/tenant-new/service/{}/data",
        h.ctx.storage.share_data_path, new_a
    ));
    assert_eq!(std::fs::read(host_path.join("db.txt")).unwrap(), b"all-rows");
    assert_eq!(std::fs::read(host_path.join("extra.txt")).unwrap(), b"extra");
    assert!(!PathBuf::from(&h.ctx.storage.tmp_root).join(&new_a).exists());
}
