//! 调用 docker 兼容命令行的镜像客户端和构建器

use async_trait::async_trait;
use executor_domain::{
    steps, BuildRequest, EventLogger, ImageBuilder, ImageClient, ImageName, RegistryAuth,
    StepStatus,
};
use executor_errors::{ExecutorError, ExecutorResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::process::{run_checked, run_command, CommandSpec};

pub struct CliImageClient {
    cli: String,
}

impl CliImageClient {
    pub fn new<S: Into<String>>(cli: S) -> Self {
        Self { cli: cli.into() }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.cli)
    }

    /// 对镜像所在仓库登录, 公共镜像不需要
    async fn login(&self, image: &str, auth: Option<&RegistryAuth>) -> ExecutorResult<()> {
        let (Some(auth), Some(domain)) = (auth, ImageName::parse(image).domain) else {
            return Ok(());
        };
        let invocation = self
            .command()
            .args(["login", "-u", auth.user.as_str(), "--password-stdin", domain.as_str()])
            .stdin(auth.password.clone());
        run_checked(&invocation, None, ExecutorError::Image).await?;
        Ok(())
    }

    async fn push_with(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
        trusted: bool,
    ) -> ExecutorResult<()> {
        self.login(image, auth).await?;
        logger.info(&format!("开始推送镜像 {image}"), steps::BUILDER, StepStatus::Running);

        let mut invocation = self.command().args(["push", image]);
        if trusted {
            invocation = invocation.env("DOCKER_CONTENT_TRUST", "1");
        }
        run_checked(&invocation, Some((logger.clone(), steps::BUILDER)), ExecutorError::Image).await?;

        logger.info(&format!("推送镜像 {image} 成功"), steps::BUILDER, StepStatus::Running);
        Ok(())
    }
}

#[async_trait]
impl ImageClient for CliImageClient {
    #[instrument(skip(self, auth, logger))]
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.login(image, auth).await?;
        logger.info(&format!("开始拉取镜像 {image}"), steps::BUILDER, StepStatus::Running);
        let invocation = self.command().args(["pull", image]);
        run_checked(&invocation, Some((logger.clone(), steps::BUILDER)), ExecutorError::Image).await?;
        logger.info(&format!("拉取镜像 {image} 成功"), steps::BUILDER, StepStatus::Running);
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> ExecutorResult<()> {
        let invocation = self.command().args(["tag", source, target]);
        run_checked(&invocation, None, ExecutorError::Image).await?;
        Ok(())
    }

    #[instrument(skip(self, auth, logger))]
    async fn push(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.push_with(image, auth, logger, false).await
    }

    #[instrument(skip(self, auth, logger))]
    async fn trusted_push(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        self.push_with(image, auth, logger, true).await
    }

    async fn save(
        &self,
        image: &str,
        dest: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest = dest.to_string_lossy().into_owned();
        let invocation = self.command().args(["save", "-o", dest.as_str(), image]);
        run_checked(&invocation, None, ExecutorError::Image).await?;
        logger.info(&format!("镜像 {image} 已导出"), steps::BUILDER, StepStatus::Running);
        Ok(())
    }

    async fn load(&self, src: &Path, logger: Arc<dyn EventLogger>) -> ExecutorResult<Vec<String>> {
        let src = src.to_string_lossy().into_owned();
        let invocation = self.command().args(["load", "-i", src.as_str()]);
        let output = run_checked(&invocation, None, ExecutorError::Image).await?;
        let images = parse_loaded_images(&output.stdout);
        info!("从 {} 导入镜像 {:?}", src, images);
        logger.info(&format!("从 {src} 导入镜像"), steps::BUILDER, StepStatus::Running);
        Ok(images)
    }

    async fn exists(&self, image: &str, auth: Option<&RegistryAuth>) -> ExecutorResult<bool> {
        self.login(image, auth).await?;
        let invocation = self.command().args(["manifest", "inspect", image]);
        Ok(run_command(&invocation, None).await?.success)
    }
}

/// 解析 `docker load` 输出中的镜像引用
pub fn parse_loaded_images(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            line.strip_prefix("Loaded image: ")
                .or_else(|| line.strip_prefix("Loaded image ID: "))
        })
        .map(|s| s.trim().to_string())
        .collect()
}

/// 使用 `<cli> build` 构建 Dockerfile
pub struct CliImageBuilder {
    cli: String,
}

impl CliImageBuilder {
    pub fn new<S: Into<String>>(cli: S) -> Self {
        Self { cli: cli.into() }
    }
}

#[async_trait]
impl ImageBuilder for CliImageBuilder {
    #[instrument(skip(self, request, logger), fields(image = %request.image_name))]
    async fn build(&self, request: &BuildRequest, logger: Arc<dyn EventLogger>) -> ExecutorResult<()> {
        let mut invocation = CommandSpec::new(&self.cli)
            .arg("build")
            .args(["-t", request.image_name.as_str()])
            .args(["-f", request.dockerfile.as_str()]);
        for (key, value) in &request.build_args {
            invocation = invocation.arg("--build-arg").arg(format!("{key}={value}"));
        }
        invocation = invocation.arg(".").current_dir(&request.context_dir);

        logger.info(
            &format!("开始构建镜像 {}", request.image_name),
            steps::BUILDER,
            StepStatus::Running,
        );
        run_checked(&invocation, Some((logger.clone(), steps::BUILDER)), ExecutorError::Image).await?;
        logger.info(
            &format!("镜像 {} 构建完成", request.image_name),
            steps::BUILDER,
            StepStatus::Running,
        );
        Ok(())
    }
}
