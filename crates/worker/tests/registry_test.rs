mod common;

use common::Harness;
use executor_config::DispatcherConfig;
use executor_dispatcher::WorkerRegistry;
use executor_domain::{TaskKind, BACKUP_APPS_NEW, BACKUP_APPS_RESTORE, DELETE_BACKUP};
use executor_worker::register_all;

#[tokio::test]
async fn test_register_all_covers_builtin_and_backup_tasks() {
    let h = Harness::new().await;
    let mut registry = WorkerRegistry::new();
    register_all(&mut registry, h.ctx.clone(), &DispatcherConfig::default());

    let kinds: Vec<&str> = registry.kinds().map(TaskKind::as_str).collect();
    assert_eq!(kinds.len(), 11);
    for kind in [
        "build_from_image",
        "build_from_source_code",
        "build_from_market_slug",
        "service_check",
        "plugin_image_build",
        "plugin_dockerfile_build",
        "share-slug",
        "share-image",
        BACKUP_APPS_NEW,
        BACKUP_APPS_RESTORE,
        DELETE_BACKUP,
    ] {
        assert!(kinds.contains(&kind), "{kind} 未注册");
    }
    assert!(!registry.contains(&TaskKind::Warmup));
}
