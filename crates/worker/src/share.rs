//! 应用分享: 把组件的 slug 或镜像推送到分享目标, 结果写入 `/rainbond/shareresult/{share_id}`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    share_result_key, steps, EventLogger, ExecutorError, ExecutorResult, RegistryAuth, ResultExt,
    ShareImageBody, ShareResult, ShareSlugBody, StepStatus, TaskMessage, TaskWorker,
};
use tracing::{info, warn};

use crate::common::{event_id_or_task, publish_json};
use crate::context::WorkerContext;

const SHARE_SUCCESS: &str = "success";
const SHARE_FAILURE: &str = "failure";

async fn publish_share(ctx: &WorkerContext, share_id: &str, status: &str) -> ExecutorResult<()> {
    let result = ShareResult {
        share_id: share_id.to_string(),
        status: status.to_string(),
    };
    publish_json(ctx.results.as_ref(), &share_result_key(share_id), &result).await
}

/// SFTP 上的分享路径 `{namespace}/{share_id}/{file}`
pub fn share_remote_path(namespace: &str, share_id: &str, local_slug: &str) -> String {
    let file = Path::new(local_slug)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| local_slug.to_string());
    if namespace.is_empty() {
        format!("{share_id}/{file}")
    } else {
        format!("{namespace}/{share_id}/{file}")
    }
}

pub struct ShareSlugWorker {
    ctx: Arc<WorkerContext>,
    body: ShareSlugBody,
    logger: Arc<dyn EventLogger>,
}

impl ShareSlugWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: ShareSlugBody = task.body()?;
        if body.share_id.is_empty() || body.local_slug_path.is_empty() {
            return Err(ExecutorError::validation_error(
                "分享 slug 任务缺少 share_id 或 local_slug_path",
            ));
        }
        if !body.slug_info.is_configured() && body.slug_path.is_empty() {
            return Err(ExecutorError::validation_error(
                "分享 slug 任务既没有 SFTP 信息也没有 slug_path",
            ));
        }
        let logger = ctx.loggers.logger(&event_id_or_task(&body.event_id, task));
        Ok(Self { ctx, body, logger })
    }
}

#[async_trait]
impl TaskWorker for ShareSlugWorker {
    fn name(&self) -> &str {
        "share-slug"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info("开始分享应用 slug", steps::SHARE, StepStatus::Starting);
        let local = Path::new(&self.body.local_slug_path);

        let size = if self.body.slug_info.is_configured() {
            let remote = share_remote_path(
                &self.body.slug_info.namespace,
                &self.body.share_id,
                &self.body.local_slug_path,
            );
            self.ctx
                .transfers
                .sftp(&self.body.slug_info.sftp_target()?)?
                .push_file(local, &remote, self.logger.clone())
                .await
                .with_context(|| format!("上传分享 slug 到 {remote} 失败"))?
        } else {
            self.ctx
                .transfers
                .local()
                .push_file(local, &self.body.slug_path, self.logger.clone())
                .await
                .with_context(|| format!("复制分享 slug 到 {} 失败", self.body.slug_path))?
        };
        info!(share_id = %self.body.share_id, service_id = %self.body.service_id, size, "slug 分享完成");
        self.logger.info("分享 slug 完成", steps::SHARE, StepStatus::Success);
        Ok(())
    }

    async fn on_success(&mut self) -> ExecutorResult<()> {
        publish_share(&self.ctx, &self.body.share_id, SHARE_SUCCESS).await
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("分享 slug 失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        if let Err(e) = publish_share(&self.ctx, &self.body.share_id, SHARE_FAILURE).await {
            warn!(share_id = %self.body.share_id, "发布分享结果失败: {e}");
        }
    }
}

pub struct ShareImageWorker {
    ctx: Arc<WorkerContext>,
    body: ShareImageBody,
    logger: Arc<dyn EventLogger>,
}

impl ShareImageWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: ShareImageBody = task.body()?;
        if body.share_id.is_empty() || body.local_image_name.is_empty() || body.image_name.is_empty()
        {
            return Err(ExecutorError::validation_error(
                "分享镜像任务缺少 share_id、local_image_name 或 image_name",
            ));
        }
        let logger = ctx.loggers.logger(&event_id_or_task(&body.event_id, task));
        Ok(Self { ctx, body, logger })
    }
}

#[async_trait]
impl TaskWorker for ShareImageWorker {
    fn name(&self) -> &str {
        "share-image"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info("开始分享应用镜像", steps::SHARE, StepStatus::Starting);
        let local = &self.body.local_image_name;
        let target = &self.body.image_name;

        let registry_auth = self.ctx.registry_auth();
        self.ctx
            .images
            .pull(local, registry_auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("拉取镜像 {local} 失败"))?;
        self.ctx.images.tag(local, target).await?;

        let info = &self.body.image_info;
        let hub_auth = RegistryAuth::optional(&info.hub_user, &info.hub_password);
        let pushed = if info.is_trust {
            self.ctx
                .images
                .trusted_push(target, hub_auth.as_ref(), self.logger.clone())
                .await
        } else {
            self.ctx
                .images
                .push(target, hub_auth.as_ref(), self.logger.clone())
                .await
        };
        pushed.with_context(|| format!("推送分享镜像 {target} 失败"))?;

        info!(share_id = %self.body.share_id, image = %target, "镜像分享完成");
        self.logger.info("分享镜像完成", steps::SHARE, StepStatus::Success);
        Ok(())
    }

    async fn on_success(&mut self) -> ExecutorResult<()> {
        publish_share(&self.ctx, &self.body.share_id, SHARE_SUCCESS).await
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("分享镜像失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        if let Err(e) = publish_share(&self.ctx, &self.body.share_id, SHARE_FAILURE).await {
            warn!(share_id = %self.body.share_id, "发布分享结果失败: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_remote_path() {
        assert_eq!(
            share_remote_path("ns", "share1", "/grdata/build/t/slug/s/v1.tgz"),
            "ns/share1/v1.tgz"
        );
        assert_eq!(share_remote_path("", "share1", "v1.tgz"), "share1/v1.tgz");
    }
}
