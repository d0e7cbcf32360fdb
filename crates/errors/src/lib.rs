use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("记录未找到: {table} {id}")]
    RecordNotFound { table: String, id: String },
    #[error("负载均衡端口冲突: {port}")]
    LbPortConflict { port: i64 },
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("文件传输错误: {0}")]
    Transfer(String),
    #[error("镜像操作错误: {0}")]
    Image(String),
    #[error("源码获取错误: {0}")]
    Source(String),
    #[error("归档错误: {0}")]
    Archive(String),
    #[error("结果存储错误: {0}")]
    ResultStore(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("Worker发生panic: {0}")]
    WorkerPanic(String),
    #[error("不支持的任务类型: {0}")]
    UnsupportedTaskType(String),
    #[error("停止超时, 仍有 {outstanding} 个任务未完成")]
    ShutdownTimeout { outstanding: usize },
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("内部错误: {0}")]
    Internal(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ExecutorError>,
    },
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

impl ExecutorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn not_found<T: Into<String>, I: Into<String>>(table: T, id: I) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id: id.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn transfer_error<S: Into<String>>(msg: S) -> Self {
        Self::Transfer(msg.into())
    }
    pub fn image_error<S: Into<String>>(msg: S) -> Self {
        Self::Image(msg.into())
    }
    pub fn archive_error<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// 剥离所有上下文包装, 返回最内层的错误
    pub fn root_cause(&self) -> &ExecutorError {
        match self {
            ExecutorError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root_cause(),
            ExecutorError::Internal(_)
                | ExecutorError::Configuration(_)
                | ExecutorError::WorkerPanic(_)
        )
    }

    /// 传输、镜像仓库、消息队列等瞬时错误可以交给调度器重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            ExecutorError::DatabaseOperation(_)
                | ExecutorError::MessageQueue(_)
                | ExecutorError::Transfer(_)
                | ExecutorError::Image(_)
                | ExecutorError::Source(_)
                | ExecutorError::ResultStore(_)
                | ExecutorError::Timeout(_)
        )
    }

    pub fn is_lb_port_conflict(&self) -> bool {
        matches!(self.root_cause(), ExecutorError::LbPortConflict { .. })
    }

    pub fn user_message(&self) -> &str {
        match self.root_cause() {
            ExecutorError::RecordNotFound { .. } => "请求的记录不存在",
            ExecutorError::Validation(_) => "输入数据验证失败",
            ExecutorError::UnsupportedTaskType(_) => "不支持的任务类型",
            ExecutorError::Timeout(_) => "操作超时，请稍后重试",
            ExecutorError::Transfer(_) => "文件传输失败，请稍后重试",
            ExecutorError::Image(_) => "镜像操作失败，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

/// 为底层错误附加"正在备份/恢复什么"的上下文
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> ExecutorResult<T>;
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> ExecutorResult<T>;
}

impl<T, E: Into<ExecutorError>> ResultExt<T> for Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> ExecutorResult<T> {
        self.map_err(|e| ExecutorError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> ExecutorResult<T> {
        self.map_err(|e| ExecutorError::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(err: serde_json::Error) -> Self {
        ExecutorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        ExecutorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
