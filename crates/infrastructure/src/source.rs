use async_trait::async_trait;
use executor_domain::{steps, CodeSource, CommitInfo, EventLogger, SourceFetcher, StepStatus};
use executor_errors::{ExecutorError, ExecutorResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::process::{run_checked, CommandSpec};

/// `git clone --depth 1` 拉取源码
pub struct GitSourceFetcher {
    git: String,
}

impl Default for GitSourceFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitSourceFetcher {
    pub fn new<S: Into<String>>(git: S) -> Self {
        Self { git: git.into() }
    }
}

/// 把账号密码写入 http(s) 地址, 其他协议原样返回
pub fn authenticated_url(repo_url: &str, user: &str, password: &str) -> String {
    if user.is_empty() {
        return repo_url.to_string();
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = repo_url.strip_prefix(scheme) {
            let rest = rest.split_once('@').map(|(_, host)| host).unwrap_or(rest);
            return format!("{scheme}{user}:{password}@{rest}");
        }
    }
    repo_url.to_string()
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    #[instrument(skip(self, source, logger), fields(repo = %source.repo_url, branch = %source.branch))]
    async fn fetch(
        &self,
        source: &CodeSource,
        dest: &Path,
        logger: Arc<dyn EventLogger>,
    ) -> ExecutorResult<CommitInfo> {
        if tokio::fs::try_exists(dest).await? {
            tokio::fs::remove_dir_all(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let branch = if source.branch.is_empty() {
            "master"
        } else {
            source.branch.as_str()
        };
        logger.info(
            &format!("开始拉取代码 {} 分支 {}", source.repo_url, branch),
            steps::BUILDER,
            StepStatus::Running,
        );

        let url = authenticated_url(&source.repo_url, &source.user, &source.password);
        let dest_str = dest.to_string_lossy().into_owned();
        let clone = CommandSpec::new(&self.git)
            .args(["clone", "--depth", "1", "-b", branch])
            .arg(url)
            .arg(dest_str)
            .env("GIT_TERMINAL_PROMPT", "0");
        // 输出中可能包含带凭证的地址, 不转发到事件日志
        run_checked(&clone, None, ExecutorError::Source)
            .await
            .map_err(|_| ExecutorError::Source(format!("拉取代码 {} 失败", source.repo_url)))?;

        let log = CommandSpec::new(&self.git)
            .args(["log", "-1", "--pretty=format:%H%n%an%n%s"])
            .current_dir(dest);
        let output = run_checked(&log, None, ExecutorError::Source).await?;
        let mut lines = output.stdout.into_iter();
        let commit = CommitInfo {
            hash: lines.next().unwrap_or_default(),
            author: lines.next().unwrap_or_default(),
            message: lines.next().unwrap_or_default(),
            branch: branch.to_string(),
        };

        info!("代码拉取完成, commit {}", commit.hash);
        logger.info(
            &format!("代码拉取完成, 版本 {}", commit.hash),
            steps::BUILDER,
            StepStatus::Running,
        );
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_url() {
        assert_eq!(
            authenticated_url("https://git.example.com/a/b.git", "u", "p"),
            "https://u:p@git.example.com/a/b.git"
        );
        assert_eq!(
            authenticated_url("https://old@git.example.com/a.git", "u", "p"),
            "https://u:p@git.example.com/a.git"
        );
        assert_eq!(
            authenticated_url("git@github.com:a/b.git", "u", "p"),
            "git@github.com:a/b.git"
        );
        assert_eq!(authenticated_url("https://x/y", "", ""), "https://x/y");
    }
}
