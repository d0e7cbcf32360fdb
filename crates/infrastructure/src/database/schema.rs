use executor_errors::ExecutorResult;
use sqlx::SqlitePool;
use tracing::debug;

/// 组件回放涉及的子表, 回滚时逐一按 service_id 删除
pub const SERVICE_CHILD_TABLES: [&str; 11] = [
    "tenant_services_port",
    "tenant_services_probe",
    "tenant_lb_mapping_port",
    "tenant_services_envs",
    "tenant_services_label",
    "tenant_services_mnt_relation",
    "tenant_service_plugin_relation",
    "tenant_services_relation",
    "tenant_services_volume",
    "tenant_service_config_file",
    "tenant_service_version",
];

pub const LB_PORT_MIN: i64 = 20001;
pub const LB_PORT_MAX: i64 = 65535;

const TABLES: [&str; 15] = [
    r#"
    CREATE TABLE IF NOT EXISTS region_app_backup (
        backup_id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL DEFAULT '',
        group_id TEXT NOT NULL,
        status TEXT NOT NULL,
        version TEXT NOT NULL DEFAULT '',
        source_dir TEXT NOT NULL DEFAULT '',
        source_type TEXT NOT NULL DEFAULT '',
        backup_mode TEXT NOT NULL DEFAULT '',
        backup_size INTEGER NOT NULL DEFAULT 0,
        deleted BOOLEAN NOT NULL DEFAULT 0,
        create_time DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        service_id TEXT NOT NULL UNIQUE,
        service_key TEXT NOT NULL DEFAULT '',
        service_alias TEXT NOT NULL,
        service_name TEXT NOT NULL DEFAULT '',
        comment TEXT NOT NULL DEFAULT '',
        service_version TEXT NOT NULL DEFAULT '',
        image_name TEXT NOT NULL DEFAULT '',
        container_cpu INTEGER NOT NULL DEFAULT 500,
        container_memory INTEGER NOT NULL DEFAULT 128,
        container_cmd TEXT NOT NULL DEFAULT '',
        extend_method TEXT NOT NULL DEFAULT 'stateless_multiple',
        replicas INTEGER NOT NULL DEFAULT 1,
        deploy_version TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        cur_status TEXT NOT NULL DEFAULT 'undeploy',
        service_type TEXT NOT NULL DEFAULT '',
        namespace TEXT NOT NULL DEFAULT '',
        service_origin TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_probe (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        probe_id TEXT NOT NULL DEFAULT '',
        mode TEXT NOT NULL DEFAULT '',
        scheme TEXT NOT NULL DEFAULT '',
        path TEXT NOT NULL DEFAULT '',
        port INTEGER NOT NULL DEFAULT 0,
        cmd TEXT NOT NULL DEFAULT '',
        http_header TEXT NOT NULL DEFAULT '',
        initial_delay_second INTEGER NOT NULL DEFAULT 0,
        period_second INTEGER NOT NULL DEFAULT 0,
        timeout_second INTEGER NOT NULL DEFAULT 0,
        is_used INTEGER NOT NULL DEFAULT 0,
        failure_threshold INTEGER NOT NULL DEFAULT 0,
        success_threshold INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_lb_mapping_port (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        port INTEGER NOT NULL UNIQUE,
        container_port INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_envs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL DEFAULT '',
        service_id TEXT NOT NULL,
        container_port INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL DEFAULT '',
        attr_name TEXT NOT NULL,
        attr_value TEXT NOT NULL DEFAULT '',
        is_change BOOLEAN NOT NULL DEFAULT 0,
        scope TEXT NOT NULL DEFAULT 'outer',
        UNIQUE (service_id, attr_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_label (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        label_key TEXT NOT NULL,
        label_value TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_mnt_relation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL DEFAULT '',
        service_id TEXT NOT NULL,
        dep_service_id TEXT NOT NULL,
        mnt_name TEXT NOT NULL DEFAULT '',
        mnt_dir TEXT NOT NULL DEFAULT '',
        volume_name TEXT NOT NULL DEFAULT '',
        volume_type TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_service_plugin_relation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plugin_id TEXT NOT NULL,
        service_id TEXT NOT NULL,
        version_id TEXT NOT NULL DEFAULT '',
        plugin_model TEXT NOT NULL DEFAULT '',
        container_cpu INTEGER NOT NULL DEFAULT 0,
        container_memory INTEGER NOT NULL DEFAULT 0,
        switch BOOLEAN NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_relation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL DEFAULT '',
        service_id TEXT NOT NULL,
        dep_service_id TEXT NOT NULL,
        dep_service_type TEXT NOT NULL DEFAULT '',
        dep_order INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_volume (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        volume_type TEXT NOT NULL DEFAULT '',
        volume_name TEXT NOT NULL,
        host_path TEXT NOT NULL DEFAULT '',
        volume_path TEXT NOT NULL DEFAULT '',
        is_read_only BOOLEAN NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_service_config_file (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id TEXT NOT NULL,
        volume_name TEXT NOT NULL,
        file_content TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_services_port (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL DEFAULT '',
        service_id TEXT NOT NULL,
        container_port INTEGER NOT NULL,
        mapping_port INTEGER NOT NULL DEFAULT 0,
        protocol TEXT NOT NULL DEFAULT 'http',
        port_alias TEXT NOT NULL DEFAULT '',
        is_inner_service BOOLEAN NOT NULL DEFAULT 0,
        is_outer_service BOOLEAN NOT NULL DEFAULT 0,
        UNIQUE (service_id, container_port)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_service_version (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        build_version TEXT NOT NULL,
        event_id TEXT NOT NULL DEFAULT '',
        service_id TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT '',
        delivered_type TEXT NOT NULL DEFAULT '',
        delivered_path TEXT NOT NULL DEFAULT '',
        image_name TEXT NOT NULL DEFAULT '',
        cmd TEXT NOT NULL DEFAULT '',
        repo_url TEXT NOT NULL DEFAULT '',
        code_version TEXT NOT NULL DEFAULT '',
        code_branch TEXT NOT NULL DEFAULT '',
        commit_msg TEXT NOT NULL DEFAULT '',
        author TEXT NOT NULL DEFAULT '',
        final_status TEXT NOT NULL DEFAULT '',
        finish_time TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_plugin (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plugin_id TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        plugin_name TEXT NOT NULL DEFAULT '',
        plugin_info TEXT NOT NULL DEFAULT '',
        image_url TEXT NOT NULL DEFAULT '',
        git_url TEXT NOT NULL DEFAULT '',
        build_model TEXT NOT NULL DEFAULT '',
        plugin_model TEXT NOT NULL DEFAULT '',
        UNIQUE (plugin_id, tenant_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_plugin_build_version (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        version_id TEXT NOT NULL DEFAULT '',
        deploy_version TEXT NOT NULL,
        plugin_id TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT '',
        base_image TEXT NOT NULL DEFAULT '',
        build_local_image TEXT NOT NULL DEFAULT '',
        build_time TEXT NOT NULL DEFAULT '',
        repo TEXT NOT NULL DEFAULT '',
        git_url TEXT NOT NULL DEFAULT '',
        info TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'building',
        container_cpu INTEGER NOT NULL DEFAULT 0,
        container_memory INTEGER NOT NULL DEFAULT 0,
        container_cmd TEXT NOT NULL DEFAULT '',
        UNIQUE (plugin_id, deploy_version)
    )
    "#,
];

/// 建表, 可重复执行
pub async fn migrate(pool: &SqlitePool) -> ExecutorResult<()> {
    debug!("Running SQLite database migrations");

    for table_sql in TABLES {
        sqlx::query(table_sql).execute(pool).await?;
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_probe_service_id ON tenant_services_probe(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_lb_port_service_id ON tenant_lb_mapping_port(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_label_service_id ON tenant_services_label(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_mnt_service_id ON tenant_services_mnt_relation(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_relation_service_id ON tenant_services_relation(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_volume_service_id ON tenant_services_volume(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_version_service_id ON tenant_service_version(service_id)",
        "CREATE INDEX IF NOT EXISTS idx_version_event_id ON tenant_service_version(event_id)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
