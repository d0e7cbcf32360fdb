use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    steps, BuildRequest, CodeSource, CommitInfo, EventLogger, ExecutorError, ExecutorResult,
    ResultExt, SourceBuildBody, StepStatus, TaskMessage, TaskWorker, VersionInfo,
    DELIVERED_IMAGE, FINAL_STATUS_FAILURE, FINAL_STATUS_SUCCESS,
};
use tracing::{info, warn};

use crate::common::{event_id_or_task, send_action, update_version};
use crate::context::WorkerContext;

const KIND: &str = "build_from_source_code";

/// 拉取源码并按 Dockerfile 构建, 只执行一次
pub struct SourceBuildWorker {
    ctx: Arc<WorkerContext>,
    body: SourceBuildBody,
    event_id: String,
    logger: Arc<dyn EventLogger>,
    commit: Option<CommitInfo>,
}

impl SourceBuildWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: SourceBuildBody = task.body()?;
        if body.repo_url.is_empty() || body.service_id.is_empty() || body.tenant_id.is_empty() {
            return Err(ExecutorError::validation_error(
                "源码构建任务缺少 repo_url、service_id 或 tenant_id",
            ));
        }
        let event_id = event_id_or_task(&body.event_id, task);
        let logger = ctx.loggers.logger(&event_id);
        Ok(Self {
            ctx,
            body,
            event_id,
            logger,
            commit: None,
        })
    }

    fn checkout_dir(&self) -> PathBuf {
        PathBuf::from(&self.ctx.storage.source_root)
            .join(&self.body.tenant_id)
            .join(&self.body.service_id)
    }

    fn apply_commit(&self, version: &mut VersionInfo) {
        version.repo_url = self.body.repo_url.clone();
        if let Some(commit) = &self.commit {
            version.code_version = commit.hash.clone();
            version.code_branch = commit.branch.clone();
            version.commit_msg = commit.message.clone();
            version.author = commit.author.clone();
        }
    }
}

#[async_trait]
impl TaskWorker for SourceBuildWorker {
    fn name(&self) -> &str {
        KIND
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        let dest = self.checkout_dir();
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest).await?;
        }

        self.logger.info(
            &format!("开始拉取代码 {} ({})", self.body.repo_url, self.body.branch),
            steps::BUILDER,
            StepStatus::Starting,
        );
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
            .with_context(|| format!("拉取代码 {} 失败", self.body.repo_url))?;
        info!(service_id = %self.body.service_id, commit = %commit.hash, "代码拉取完成");
        self.commit = Some(commit);

        if !tokio::fs::try_exists(dest.join(&self.body.dockerfile)).await.unwrap_or(false) {
            return Err(ExecutorError::validation_error(format!(
                "代码仓库中没有 {}",
                self.body.dockerfile
            )));
        }

        let image = self
            .ctx
            .local_image_name(&self.body.service_id, &self.body.deploy_version);
        let request = BuildRequest {
            context_dir: dest.clone(),
            dockerfile: self.body.dockerfile.clone(),
            image_name: image.clone(),
            build_args: self.body.build_args.clone(),
        };
        self.ctx.builder.build(&request, self.logger.clone()).await?;
        let auth = self.ctx.registry_auth();
        self.ctx
            .images
            .push(&image, auth.as_ref(), self.logger.clone())
            .await
            .with_context(|| format!("推送镜像 {image} 失败"))?;

        let mut version = VersionInfo::default();
        self.apply_commit(&mut version);
        update_version(
            &self.ctx,
            &self.event_id,
            &self.body.service_id,
            &self.body.deploy_version,
            KIND,
            move |record| {
                record.repo_url = version.repo_url;
                record.code_version = version.code_version;
                record.code_branch = version.code_branch;
                record.commit_msg = version.commit_msg;
                record.author = version.author;
                record.delivered_type = DELIVERED_IMAGE.to_string();
                record.delivered_path = image.clone();
                record.image_name = image;
                record.final_status = FINAL_STATUS_SUCCESS.to_string();
            },
        )
        .await?;
        self.logger.info("源码构建完成", steps::BUILDER, StepStatus::Success);
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
            &format!("源码构建失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        let mut partial = VersionInfo::default();
        self.apply_commit(&mut partial);
        let result = update_version(
            &self.ctx,
            &self.event_id,
            &self.body.service_id,
            &self.body.deploy_version,
            KIND,
            move |record| {
                record.repo_url = partial.repo_url;
                record.code_version = partial.code_version;
                record.code_branch = partial.code_branch;
                record.commit_msg = partial.commit_msg;
                record.author = partial.author;
                record.final_status = FINAL_STATUS_FAILURE.to_string();
            },
        )
        .await;
        if let Err(e) = result {
            warn!(event_id = %self.event_id, "更新构建版本失败: {e}");
        }
    }
}
