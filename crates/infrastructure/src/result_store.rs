use async_trait::async_trait;
use executor_domain::ResultStore;
use executor_errors::{ExecutorError, ExecutorResult};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 结果保留一周
const RESULT_TTL_SECONDS: u64 = 7 * 24 * 3600;

pub struct RedisResultStore {
    conn: ConnectionManager,
}

impl RedisResultStore {
    pub async fn connect(url: &str) -> ExecutorResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ExecutorError::ResultStore(format!("无效的 Redis 地址 {url}: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ExecutorError::ResultStore(format!("连接 Redis 失败: {e}")))?;
        info!("成功连接到Redis: {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, key: &str, value: &str) -> ExecutorResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(RESULT_TTL_SECONDS)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ExecutorError::ResultStore(format!("写入 {key} 失败: {e}")))?;
        debug!("结果已发布: {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> ExecutorResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| ExecutorError::ResultStore(format!("读取 {key} 失败: {e}")))
    }
}

/// 单进程部署使用的内存结果存储
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, key: &str, value: &str) -> ExecutorResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> ExecutorResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_overwrites() {
        let store = InMemoryResultStore::new();
        store.put("/rainbond/backup_restore/r1", "a").await.unwrap();
        store.put("/rainbond/backup_restore/r1", "b").await.unwrap();
        assert_eq!(
            store.get("/rainbond/backup_restore/r1").await.unwrap().as_deref(),
            Some("b")
        );
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
