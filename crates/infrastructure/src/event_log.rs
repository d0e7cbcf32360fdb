use executor_domain::{EventLogger, EventLoggerFactory, StepStatus};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 把用户可见的事件写成 target 为 `event_log` 的 tracing 事件
#[derive(Debug, Clone)]
pub struct TracingEventLogger {
    event_id: String,
}

impl TracingEventLogger {
    pub fn new<S: Into<String>>(event_id: S) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }
}

impl EventLogger for TracingEventLogger {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn info(&self, message: &str, step: &str, status: StepStatus) {
        info!(target: "event_log", event_id = %self.event_id, step, status = %status, "{}", message);
    }

    fn error(&self, message: &str, step: &str, status: StepStatus) {
        error!(target: "event_log", event_id = %self.event_id, step, status = %status, "{}", message);
    }

    fn debug(&self, message: &str, step: &str, status: StepStatus) {
        debug!(target: "event_log", event_id = %self.event_id, step, status = %status, "{}", message);
    }
}

#[derive(Debug, Default, Clone)]
pub struct TracingEventLoggerFactory;

impl EventLoggerFactory for TracingEventLoggerFactory {
    fn logger(&self, event_id: &str) -> Arc<dyn EventLogger> {
        Arc::new(TracingEventLogger::new(event_id))
    }
}
