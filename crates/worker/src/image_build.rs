use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, EventLogger, ExecutorError, ExecutorResult, ImageBuildBody, RegistryAuth, ResultExt,
    StepStatus, TaskMessage, TaskWorker, DELIVERED_IMAGE, FINAL_STATUS_FAILURE,
    FINAL_STATUS_SUCCESS,
};
use tracing::warn;

use crate::common::{event_id_or_task, send_action, update_version};
use crate::context::WorkerContext;

const KIND: &str = "build_from_image";

/// 拉取用户镜像, 重新打标签后推送到平台仓库
pub struct ImageBuildWorker {
    ctx: Arc<WorkerContext>,
    body: ImageBuildBody,
    event_id: String,
    logger: Arc<dyn EventLogger>,
}

impl ImageBuildWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: ImageBuildBody = task.body()?;
        if body.image.is_empty() || body.service_id.is_empty() {
            return Err(ExecutorError::validation_error("镜像构建任务缺少 image 或 service_id"));
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

    fn local_image(&self) -> String {
        self.ctx
            .local_image_name(&self.body.service_id, &self.body.deploy_version)
    }
}

#[async_trait]
impl TaskWorker for ImageBuildWorker {
    fn name(&self) -> &str {
        KIND
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info(
            &format!("开始拉取镜像 {}", self.body.image),
            steps::BUILDER,
            StepStatus::Starting,
        );
        let source_auth = RegistryAuth::optional(&self.body.user, &self.body.password);
        self.ctx
            .images
            .pull(&self.body.image, source_auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("拉取镜像 {} 失败", self.body.image))?;

        let local = self.local_image();
        self.ctx.images.tag(&self.body.image, &local).await?;
        let auth = self.ctx.registry_auth();
        self.ctx
            .images
            .push(&local, auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("推送镜像 {local} 失败"))?;

        let image = self.body.image.clone();
        update_version(
            &self.ctx,
            &self.event_id,
            &self.body.service_id,
            &self.body.deploy_version,
            KIND,
            |version| {
                version.delivered_type = DELIVERED_IMAGE.to_string();
                version.delivered_path = local.clone();
                version.image_name = image;
                version.final_status = FINAL_STATUS_SUCCESS.to_string();
            },
        )
        .await?;
        self.logger.info("镜像构建完成", steps::BUILDER, StepStatus::Success);
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
            &format!("镜像构建失败: {err}"),
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
