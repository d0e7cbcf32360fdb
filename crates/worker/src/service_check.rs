use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use executor_domain::{
    service_check_key, steps, CheckErrorInfo, CodeSource, EventLogger, ExecutorError,
    ExecutorResult, RegistryAuth, ServiceCheckBody, ServiceCheckResult, StepStatus, TaskMessage,
    TaskWorker, CHECK_SOURCE_CODE, CHECK_SOURCE_IMAGE,
};
use serde_json::json;
use tracing::{info, warn};

use crate::common::{event_id_or_task, publish_json};
use crate::context::WorkerContext;

const CHECK_SUCCESS: &str = "success";
const CHECK_FAILURE: &str = "failure";

/// Dockerfile 中 EXPOSE 声明的端口
pub fn exposed_ports(dockerfile: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for line in dockerfile.lines() {
        let line = line.trim();
        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if !keyword.eq_ignore_ascii_case("EXPOSE") {
            continue;
        }
        for item in rest.split_whitespace() {
            let port = item.split('/').next().unwrap_or_default();
            if let Ok(port) = port.parse::<u16>() {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

/// 创建组件前检测镜像或源码是否可用
pub struct ServiceCheckWorker {
    ctx: Arc<WorkerContext>,
    body: ServiceCheckBody,
    logger: Arc<dyn EventLogger>,
}

impl ServiceCheckWorker {
    pub fn new(ctx: Arc<WorkerContext>, task: &TaskMessage) -> ExecutorResult<Self> {
        let body: ServiceCheckBody = task.body()?;
        if body.check_uuid.is_empty() || body.source_body.is_empty() {
            return Err(ExecutorError::validation_error(
                "检测任务缺少 check_uuid 或 source_body",
            ));
        }
        if body.source_type != CHECK_SOURCE_IMAGE && body.source_type != CHECK_SOURCE_CODE {
            return Err(ExecutorError::validation_error(format!(
                "不支持的检测来源 {}",
                body.source_type
            )));
        }
        let logger = ctx.loggers.logger(&event_id_or_task(&body.event_id, task));
        Ok(Self { ctx, body, logger })
    }

    fn failure(error_type: &str, error_info: String, solve_advice: &str) -> ServiceCheckResult {
        ServiceCheckResult {
            check_status: CHECK_FAILURE.to_string(),
            error_infos: vec![CheckErrorInfo {
                error_type: error_type.to_string(),
                error_info,
                solve_advice: solve_advice.to_string(),
            }],
            service_info: serde_json::Value::Null,
        }
    }

    async fn check_image(&self) -> ExecutorResult<ServiceCheckResult> {
        let image = &self.body.source_body;
        let auth = RegistryAuth::optional(&self.body.username, &self.body.password);
        if !self.ctx.images.exists(image, auth.as_ref()).await? {
            return Ok(Self::failure(
                "image not found",
                format!("镜像 {image} 不存在或无权访问"),
                "请确认镜像名称和仓库账号密码",
            ));
        }
        Ok(ServiceCheckResult {
            check_status: CHECK_SUCCESS.to_string(),
            error_infos: Vec::new(),
            service_info: json!({
                "image": image,
                "language": CHECK_SOURCE_IMAGE,
            }),
        })
    }

    async fn check_source(&self) -> ExecutorResult<ServiceCheckResult> {
        let dest = PathBuf::from(&self.ctx.storage.source_root)
            .join("check")
            .join(&self.body.check_uuid);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest).await?;
        }
        let source = CodeSource {
            repo_url: self.body.source_body.clone(),
            branch: self.body.branch.clone(),
            user: self.body.username.clone(),
            password: self.body.password.clone(),
        };
        let fetched = self
            .ctx
            .sources
            .fetch(&source, &dest, self.logger.clone())
            .await;
        let result = match fetched {
            Ok(commit) => self.inspect_checkout(&dest, &commit.hash).await,
            Err(e) => Ok(Self::failure(
                "get code failure",
                format!("拉取代码失败: {e}"),
                "请确认仓库地址、分支和账号密码",
            )),
        };
        if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %dest.display(), "清理检测代码目录失败: {e}");
            }
        }
        result
    }

    async fn inspect_checkout(&self, dest: &Path, commit: &str) -> ExecutorResult<ServiceCheckResult> {
        let dockerfile = dest.join("Dockerfile");
        let content = match tokio::fs::read_to_string(&dockerfile).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::failure(
                    "dockerfile not found",
                    "代码仓库根目录没有 Dockerfile".to_string(),
                    "请在仓库根目录添加 Dockerfile",
                ));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ServiceCheckResult {
            check_status: CHECK_SUCCESS.to_string(),
            error_infos: Vec::new(),
            service_info: json!({
                "language": "dockerfile",
                "branch": self.body.branch,
                "commit": commit,
                "ports": exposed_ports(&content),
            }),
        })
    }
}

#[async_trait]
impl TaskWorker for ServiceCheckWorker {
    fn name(&self) -> &str {
        "service_check"
    }

    fn logger(&self) -> Arc<dyn EventLogger> {
        self.logger.clone()
    }

    async fn run(&mut self, _timeout: Duration) -> ExecutorResult<()> {
        self.logger.info("开始检测组件来源", steps::SERVICE_CHECK, StepStatus::Starting);
        let result = if self.body.source_type == CHECK_SOURCE_IMAGE {
            self.check_image().await?
        } else {
            self.check_source().await?
        };
        publish_json(
            self.ctx.results.as_ref(),
            &service_check_key(&self.body.check_uuid),
            &result,
        )
        .await?;
        info!(check_uuid = %self.body.check_uuid, status = %result.check_status, "检测完成");
        self.logger.info(
            &format!("检测完成: {}", result.check_status),
            steps::SERVICE_CHECK,
            StepStatus::Success,
        );
        Ok(())
    }

    async fn error_callback(&mut self, err: &ExecutorError) {
        self.logger.error(
            &format!("检测失败: {err}"),
            steps::CALLBACK,
            StepStatus::Failure,
        );
        let result = Self::failure("check error", err.to_string(), "请稍后重试");
        if let Err(e) = publish_json(
            self.ctx.results.as_ref(),
            &service_check_key(&self.body.check_uuid),
            &result,
        )
        .await
        {
            warn!(check_uuid = %self.body.check_uuid, "发布检测结果失败: {e}");
        }
    }
}
