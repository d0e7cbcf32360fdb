use anyhow::Result;
use executor_domain::MetricsRecorder;
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 任务计数器, 同时写入 `metrics` 门面
#[derive(Debug, Default)]
pub struct MetricsCollector {
    accepted: AtomicU64,
    errored: AtomicU64,
    returned: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub errored: u64,
    pub returned: u64,
    pub in_flight: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

impl MetricsRecorder for MetricsCollector {
    fn task_accepted(&self, task_type: &str) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        counter!("executor_tasks_total", "task_type" => task_type.to_string()).increment(1);
    }

    fn task_failed(&self, task_type: &str) {
        self.errored.fetch_add(1, Ordering::Relaxed);
        counter!("executor_task_errors_total", "task_type" => task_type.to_string()).increment(1);
        warn!(task_type = task_type, "Task execution failed");
    }

    fn task_returned(&self, task_type: &str) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        counter!("executor_tasks_returned_total", "task_type" => task_type.to_string())
            .increment(1);
    }

    fn in_flight_changed(&self, in_flight: usize) {
        self.in_flight.store(in_flight, Ordering::Relaxed);
        gauge!("executor_tasks_in_flight").set(in_flight as f64);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// 初始化 tracing, RUST_LOG 优先于配置的级别
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
    }

    info!(logging.format = ?format, logging.level = level, "Structured logging initialized");
    Ok(())
}

/// 安装 Prometheus exporter, 需要在 tokio 运行时中调用
pub fn init_metrics_exporter(bind: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(bind)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Prometheus exporter listening on {}", bind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_counts() {
        let collector = MetricsCollector::new();
        collector.task_accepted("build_from_image");
        collector.task_accepted("backup_apps_new");
        collector.task_failed("backup_apps_new");
        collector.task_returned("build_from_image");
        collector.in_flight_changed(3);

        assert_eq!(
            collector.snapshot(),
            MetricsSnapshot {
                accepted: 2,
                errored: 1,
                returned: 1,
                in_flight: 3,
            }
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("other"), LogFormat::Pretty);
    }
}
