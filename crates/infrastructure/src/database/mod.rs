pub mod manager;
pub mod schema;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use sqlite::{
    SqliteAppBackupRepository, SqliteMetadataTx, SqlitePluginBuildRepository,
    SqliteServiceRepository, SqliteVersionRepository,
};
