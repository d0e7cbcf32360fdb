pub mod app_backup_repository;
pub mod plugin_build_repository;
pub mod service_repository;
pub mod version_repository;

pub use app_backup_repository::SqliteAppBackupRepository;
pub use plugin_build_repository::SqlitePluginBuildRepository;
pub use service_repository::{SqliteMetadataTx, SqliteServiceRepository};
pub use version_repository::SqliteVersionRepository;
