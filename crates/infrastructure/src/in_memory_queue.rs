use async_trait::async_trait;
use executor_domain::{TaskMessage, TaskQueue};
use executor_errors::{ExecutorError, ExecutorResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// 内存任务队列, 每个 topic 一个无界 channel, 适用于单进程部署和测试
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    topics: RwLock<HashMap<String, TopicChannel>>,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
struct TopicChannel {
    sender: mpsc::UnboundedSender<TaskMessage>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<TaskMessage>>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel(&self, topic: &str) -> ExecutorResult<TopicChannel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::MessageQueue("队列已关闭".to_string()));
        }
        if let Some(channel) = self.topics.read().await.get(topic) {
            return Ok(channel.clone());
        }
        let mut topics = self.topics.write().await;
        let channel = topics.entry(topic.to_string()).or_insert_with(|| {
            debug!("创建内存队列: {}", topic);
            let (sender, receiver) = mpsc::unbounded_channel();
            TopicChannel {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            }
        });
        Ok(channel.clone())
    }

    /// 丢弃所有发送端, 等待中的 receive 返回 None
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.write().await.clear();
        info!("内存队列已关闭");
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn publish(&self, topic: &str, task: &TaskMessage) -> ExecutorResult<()> {
        let channel = self.channel(topic).await?;
        channel
            .sender
            .send(task.clone())
            .map_err(|_| ExecutorError::MessageQueue(format!("队列 {topic} 已关闭")))?;
        Ok(())
    }

    async fn receive(&self, topic: &str) -> ExecutorResult<Option<TaskMessage>> {
        let receiver = match self.channel(topic).await {
            Ok(channel) => channel.receiver,
            Err(_) => return Ok(None),
        };
        let mut receiver = receiver.lock().await;
        Ok(receiver.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_topics_are_isolated_and_ordered() {
        let queue = InMemoryTaskQueue::new();
        queue
            .publish("builder", &TaskMessage::new("a", serde_json::json!({})))
            .await
            .unwrap();
        queue
            .publish("builder", &TaskMessage::new("b", serde_json::json!({})))
            .await
            .unwrap();
        queue
            .publish("worker", &TaskMessage::new("c", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(queue.receive("builder").await.unwrap().unwrap().task_type, "a");
        assert_eq!(queue.receive("builder").await.unwrap().unwrap().task_type, "b");
        assert_eq!(queue.receive("worker").await.unwrap().unwrap().task_type, "c");
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("builder").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;

        let received = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(queue
            .publish("builder", &TaskMessage::new("x", serde_json::json!({})))
            .await
            .is_err());
    }
}
