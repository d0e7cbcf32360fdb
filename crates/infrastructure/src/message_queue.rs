use async_trait::async_trait;
use executor_config::MessageQueueConfig;
use executor_domain::{TaskMessage, TaskQueue};
use executor_errors::{ExecutorError, ExecutorResult};
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// RabbitMQ 任务队列, 消费端使用 basic_get 轮询
pub struct RabbitMqTaskQueue {
    connection: Connection,
    channel: Mutex<Channel>,
    declared: Mutex<HashSet<String>>,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl RabbitMqTaskQueue {
    pub async fn connect(config: &MessageQueueConfig) -> ExecutorResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| ExecutorError::MessageQueue(format!("连接RabbitMQ超时: {}", config.url)))?
        .map_err(|e| ExecutorError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ExecutorError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel: Mutex::new(channel),
            declared: Mutex::new(HashSet::new()),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            closed: AtomicBool::new(false),
        };
        queue.ensure_queue(&config.builder_topic).await?;
        queue.ensure_queue(&config.worker_topic).await?;
        Ok(queue)
    }

    async fn ensure_queue(&self, queue_name: &str) -> ExecutorResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue_name) {
            return Ok(());
        }

        let channel = self.channel.lock().await;
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ExecutorError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        declared.insert(queue_name.to_string());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接, 阻塞中的 receive 在下一次轮询时返回 None
    pub async fn close(&self) -> ExecutorResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| ExecutorError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RabbitMqTaskQueue {
    async fn publish(&self, topic: &str, task: &TaskMessage) -> ExecutorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecutorError::MessageQueue("队列已关闭".to_string()));
        }
        self.ensure_queue(topic).await?;
        let payload = task.to_bytes()?;

        let channel = self.channel.lock().await;
        let confirm = channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| {
                ExecutorError::MessageQueue(format!("发布消息到队列 {topic} 失败: {e}"))
            })?;
        confirm
            .await
            .map_err(|e| ExecutorError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!(task_id = %task.task_id, task_type = %task.task_type, "消息已发布到队列: {}", topic);
        Ok(())
    }

    async fn receive(&self, topic: &str) -> ExecutorResult<Option<TaskMessage>> {
        self.ensure_queue(topic).await?;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let delivery = {
                let channel = self.channel.lock().await;
                let got = channel
                    .basic_get(topic, BasicGetOptions::default())
                    .await
                    .map_err(|e| {
                        ExecutorError::MessageQueue(format!("从队列 {topic} 获取消息失败: {e}"))
                    })?;
                if let Some(message) = &got {
                    channel
                        .basic_ack(message.delivery_tag, BasicAckOptions::default())
                        .await
                        .map_err(|e| ExecutorError::MessageQueue(format!("确认消息失败: {e}")))?;
                }
                got
            };

            match delivery {
                Some(message) => match TaskMessage::from_bytes(&message.data) {
                    Ok(task) => return Ok(Some(task)),
                    Err(e) => warn!("丢弃无法解析的消息: {}", e),
                },
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}
