use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, BuildRequest, CodeSource, EventLogger, ExecutorError, ExecutorResult, PluginBuildBody,
    PluginBuildVersion, RegistryAuth, ResultExt, StepStatus, TaskKind, TaskMessage, TaskWorker,
    PLUGIN_STATUS_BUILDING, PLUGIN_STATUS_COMPLETE, PLUGIN_STATUS_FAILURE,
};
use tracing::{info, warn};

use crate::common::{event_id_or_task, now_string};
use crate::context::WorkerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSource {
    Image,
    Dockerfile,
}

impl PluginSource {
    fn kind(self) -> TaskKind {
        match self {
            PluginSource::Image => TaskKind::PluginImageBuild,
            PluginSource::Dockerfile => TaskKind::PluginDockerfileBuild,
        }
    }
}

/// 构建插件镜像, 结果写回插件构建版本的状态
pub struct PluginBuildWorker {
    ctx: Arc<WorkerContext>,
    body: PluginBuildBody,
    source: PluginSource,
    logger: Arc<dyn EventLogger>,
}

impl PluginBuildWorker {
    pub fn new(
        ctx: Arc<WorkerContext>,
        task: &TaskMessage,
        source: PluginSource,
    ) -> ExecutorResult<Self> {
        let body: PluginBuildBody = task.body()?;
        if body.plugin_id.is_empty() || body.deploy_version.is_empty() {
            return Err(ExecutorError::validation_error(
                "插件构建任务缺少 plugin_id 或 deploy_version",
            ));
        }
        let missing = match source {
            PluginSource::Image => body.image_url.is_empty(),
            PluginSource::Dockerfile => body.repo_url.is_empty(),
        };
        if missing {
            return Err(ExecutorError::validation_error(format!(
                "{} 任务缺少源地址",
                source.kind()
            )));
        }
        let logger = ctx.loggers.logger(&event_id_or_task(&body.event_id, task));
        Ok(Self {
            ctx,
            body,
            source,
            logger,
        })
    }

    fn plugin_image(&self) -> String {
        format!(
            "{}/plugin_{}:{}",
            self.ctx.registry.domain, self.body.plugin_id, self.body.deploy_version
        )
    }

    async fn ensure_build_version(&self) -> ExecutorResult<()> {
        let existing = self
            .ctx
            .plugin_builds
            .get(&self.body.plugin_id, &self.body.deploy_version)
            .await?;
        if existing.is_some() {
            return self
                .ctx
                .plugin_builds
                .update_status(
                    &self.body.plugin_id,
                    &self.body.deploy_version,
                    PLUGIN_STATUS_BUILDING,
                    "",
                )
                .await;
        }
        let version = PluginBuildVersion {
            version_id: uuid::Uuid::new_v4().simple().to_string(),
            deploy_version: self.body.deploy_version.clone(),
            plugin_id: self.body.plugin_id.clone(),
            kind: self.source.kind().to_string(),
            base_image: self.body.image_url.clone(),
            build_time: now_string(),
            repo: self.body.branch.clone(),
            git_url: self.body.repo_url.clone(),
            status: PLUGIN_STATUS_BUILDING.to_string(),
            ..Default::default()
        };
        self.ctx.plugin_builds.create(&version).await
    }

    async fn build_from_image(&self, image: &str) -> ExecutorResult<()> {
        let auth = RegistryAuth::optional(&self.body.user, &self.body.password);
        self.ctx
            .images
            .pull(&self.body.image_url, auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("拉取插件镜像 {} 失败", self.body.image_url))?;
        self.ctx.images.tag(&self.body.image_url, image).await
    }

    async fn build_from_dockerfile(&self, image: &str) -> ExecutorResult<()> {
        let dest = PathBuf::from(&self.ctx.storage.source_root)
            .join("plugin")
            .join(&self.body.plugin_id);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        let source = CodeSource {
            repo_url: self.body.repo_url.clone(),
            branch: self.body.branch.clone(),
            user: self.body.user.clone(),
            password: self.body.password.clone(),
        };
        let commit = self
            .ctx
            .sources
            .fetch(&source, &dest, self.logger.clone())
            .await
            .with_context(|| format!("拉取插件代码 {} 失败", self.body.repo_url))?;
        info!(plugin_id = %self.body.plugin_id, commit = %commit.hash, "插件代码拉取完成");

        let request = BuildRequest {
            context_dir: dest,
            dockerfile: "Dockerfile".to_string(),
            image_name: image.to_string(),
            build_args: self.body.build_args.clone(),
        };
        self.ctx.builder.build(&request, self.logger.clone()).await
    }
}

#[async_trait]
impl TaskWorker for PluginBuildWorker {
    fn name(&self) -> &str {
        match self.source {
            PluginSource::Image => "plugin_image_build",
            PluginSource::Dockerfile => "plugin_dockerfile_build",
        }
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.ensure_build_version().await?;
        self.logger.info("开始构建插件", steps::BUILDER, StepStatus::Starting);

        let image = self.plugin_image();
        match self.source {
            PluginSource::Image => self.build_from_image(&image).await?,
            PluginSource::Dockerfile => self.build_from_dockerfile(&image).await?,
        }
        let auth = self.ctx.registry_auth();
        self.ctx
            .images
            .push(&image, auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("推送插件镜像 {image} 失败"))?;

        self.ctx
            .plugin_builds
            .update_status(
                &self.body.plugin_id,
                &self.body.deploy_version,
                PLUGIN_STATUS_COMPLETE,
                &image,
            )
            .await?;
        self.logger.info("插件构建完成", steps::LAST, StepStatus::Success);
        Ok(())
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("插件构建失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        let result = self
            .ctx
            .plugin_builds
            .update_status(
                &self.body.plugin_id,
                &self.body.deploy_version,
                PLUGIN_STATUS_FAILURE,
                "",
            )
            .await;
        if let Err(e) = result {
            warn!(plugin_id = %self.body.plugin_id, "更新插件构建状态失败: {e}");
        }
    }
}
