use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 优雅关闭管理器, 向所有订阅者广播一次关闭信号
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
        }
    }

    /// 已关闭后订阅会得到一个立即触发的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        match shutdown_tx.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut shutdown_tx = self.shutdown_tx.write().await;
        match shutdown_tx.take() {
            Some(tx) => {
                debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
                let _ = tx.send(());
                info!("关闭信号已发送");
            }
            None => debug!("关闭管理器已经触发过关闭"),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_shutdown() {
        let manager = ShutdownManager::new();
        let mut first = manager.subscribe().await;
        let mut second = manager.clone().subscribe().await;

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_late_subscriber_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;

        let mut late = manager.subscribe().await;
        assert!(late.recv().await.is_ok());
    }
}
