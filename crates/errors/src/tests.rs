use crate::*;

#[test]
fn test_executor_error_display() {
    let db_op_error = ExecutorError::DatabaseOperation("Connection failed".to_string());
    assert_eq!(db_op_error.to_string(), "数据库操作错误: Connection failed");

    let not_found = ExecutorError::not_found("region_app_backup", "b1");
    assert_eq!(not_found.to_string(), "记录未找到: region_app_backup b1");

    let conflict = ExecutorError::LbPortConflict { port: 20001 };
    assert_eq!(conflict.to_string(), "负载均衡端口冲突: 20001");

    let shutdown = ExecutorError::ShutdownTimeout { outstanding: 3 };
    assert_eq!(shutdown.to_string(), "停止超时, 仍有 3 个任务未完成");

    let unsupported = ExecutorError::UnsupportedTaskType("foo".to_string());
    assert_eq!(unsupported.to_string(), "不支持的任务类型: foo");
}

#[test]
fn test_context_wraps_and_preserves_root_cause() {
    let result: Result<(), ExecutorError> =
        Err(ExecutorError::transfer_error("connection reset"));
    let err = result.context("推送slug文件失败").unwrap_err();

    assert_eq!(err.to_string(), "推送slug文件失败: 文件传输错误: connection reset");
    assert!(matches!(err.root_cause(), ExecutorError::Transfer(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_context_converts_foreign_errors() {
    let io: Result<(), std::io::Error> = Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "missing",
    ));
    let err = io.with_context(|| format!("读取 {} 失败", "metadata.json")).unwrap_err();

    assert!(matches!(err.root_cause(), ExecutorError::Io(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_retryable_classification() {
    assert!(ExecutorError::Image("pull failed".into()).is_retryable());
    assert!(ExecutorError::Timeout("30m".into()).is_retryable());
    assert!(!ExecutorError::Validation("bad status".into()).is_retryable());
    assert!(!ExecutorError::UnsupportedTaskType("x".into()).is_retryable());
}

#[test]
fn test_fatal_and_lb_conflict_helpers() {
    assert!(ExecutorError::WorkerPanic("boom".into()).is_fatal());
    assert!(!ExecutorError::Transfer("x".into()).is_fatal());

    let wrapped: ExecutorResult<()> = Err(ExecutorError::LbPortConflict { port: 1 });
    assert!(wrapped.context("插入端口").unwrap_err().is_lb_port_conflict());
}

#[test]
fn test_from_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: ExecutorError = json_err.into();
    assert!(matches!(err, ExecutorError::Serialization(_)));

    let any: ExecutorError = anyhow::anyhow!("boom").into();
    assert_eq!(any.to_string(), "内部错误: boom");
}

#[test]
fn test_user_message() {
    assert_eq!(
        ExecutorError::Validation("x".into()).user_message(),
        "输入数据验证失败"
    );
    assert_eq!(
        ExecutorError::Internal("x".into()).user_message(),
        "系统繁忙，请稍后重试"
    );
}
