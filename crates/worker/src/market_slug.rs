use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, EventLogger, ExecutorError, ExecutorResult, MarketSlugBody, ResultExt, StepStatus,
    TaskMessage, TaskWorker, DELIVERED_SLUG, FINAL_STATUS_FAILURE, FINAL_STATUS_SUCCESS,
};
use tracing::{info, warn};

use crate::bundle;
use crate::common::{event_id_or_task, send_action, update_version};
use crate::context::WorkerContext;

const KIND: &str = "build_from_market_slug";

/// 从应用市场拿到 slug 包, 放到组件的交付目录
pub struct MarketSlugWorker {
    ctx: Arc<WorkerContext>,
    body: MarketSlugBody,
    event_id: String,
    logger: Arc<dyn EventLogger>,
}

impl MarketSlugWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: MarketSlugBody = task.body()?;
        if body.slug_info.slug_path.is_empty() || body.service_id.is_empty() {
            return Err(ExecutorError::validation_error(
                "市场 slug 任务缺少 slug_path 或 service_id",
            ));
        }
        let event_id = event_id_or_task(&body.event_id, task);
        let logger = ctx.loggers.logger(&event_id);
        Ok(Self {
            ctx,
            body,
            event_id,
            logger,
        })
    }

    fn destination(&self) -> PathBuf {
        PathBuf::from(bundle::slug_delivered_path(
            &self.ctx.storage.slug_root,
            &self.body.tenant_id,
            &self.body.service_id,
            &self.body.deploy_version,
        ))
    }
}

#[async_trait]
impl TaskWorker for MarketSlugWorker {
    fn name(&self) -> &str {
        KIND
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        let dest = self.destination();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let slug_path = &self.body.slug_info.slug_path;
        self.logger.info(
            &format!("开始获取应用市场 slug {slug_path}"),
            steps::BUILDER,
            StepStatus::Starting,
        );

        let size = match self.body.slug_info.sftp_target() {
            Some(target) => self
                .ctx
                .transfers
                .sftp(&target)?
                .download_file(slug_path, &dest, self.logger.clone())
                .await
                .with_context(|| format!("从 SFTP 下载 {slug_path} 失败"))?,
            None => self
                .ctx
                .transfers
                .local()
                .download_file(slug_path, &dest, self.logger.clone())
                .await
                .with_context(|| format!("复制 {slug_path} 失败"))?,
        };
        info!(service_id = %self.body.service_id, size, "市场 slug 已就绪");

        let delivered = dest.to_string_lossy().into_owned();
        update_version(
            &self.ctx,
            &self.event_id,
            &self.body.service_id,
            &self.body.deploy_version,
            KIND,
            |version| {
                version.delivered_type = DELIVERED_SLUG.to_string();
                version.delivered_path = delivered;
                version.final_status = FINAL_STATUS_SUCCESS.to_string();
            },
        )
        .await?;
        self.logger.info("slug 获取完成", steps::BUILDER, StepStatus::Success);
        Ok(())
    }

    async fn on_success(&mut self) -> ExecutorResult<()> {
        send_action(
            &self.ctx,
            &self.logger,
            &self.body.tenant_id,
            &self.body.service_id,
            &self.body.deploy_version,
            &self.event_id,
            &self.body.action,
        )
        .await
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("获取应用市场 slug 失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        let result = update_version(
            &self.ctx,
            &self.event_id,
            &self.body.service_id,
            &self.body.deploy_version,
            KIND,
            |version| version.final_status = FINAL_STATUS_FAILURE.to_string(),
        )
        .await;
        if let Err(e) = result {
            warn!(event_id = %self.event_id, "更新构建版本失败: {e}");
        }
    }
}
