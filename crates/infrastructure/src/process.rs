use executor_domain::{EventLogger, StepStatus};
use executor_errors::{ExecutorError, ExecutorResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// 外部命令调用参数
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<P: Into<String>>(program: P) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin<S: Into<String>>(mut self, input: S) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// 执行命令并收集输出; 传入 logger 时每行 stdout 作为 debug 事件转发
pub async fn run_command(
    invocation: &CommandSpec,
    logger: Option<(Arc<dyn EventLogger>, &str)>,
) -> ExecutorResult<CommandOutput> {
    debug!("执行命令: {}", invocation.display());

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(&invocation.envs)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        ExecutorError::TaskExecution(format!("启动命令 {} 失败: {e}", invocation.program))
    })?;

    if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutorError::TaskExecution("无法获取stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecutorError::TaskExecution("无法获取stderr".to_string()))?;

    let stdout_task = async {
        let mut lines = BufReader::new(stdout).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some((logger, step)) = &logger {
                logger.debug(&line, step, StepStatus::Running);
            }
            collected.push(line);
        }
        collected
    };
    let stderr_task = async {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
        }
        collected
    };
    let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);

    let status = child.wait().await?;
    Ok(CommandOutput {
        success: status.success(),
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// 执行命令, 非零退出码转换为错误
pub async fn run_checked(
    invocation: &CommandSpec,
    logger: Option<(Arc<dyn EventLogger>, &str)>,
    to_error: fn(String) -> ExecutorError,
) -> ExecutorResult<CommandOutput> {
    let output = run_command(invocation, logger).await?;
    if !output.success {
        return Err(to_error(format!(
            "{} 退出码 {:?}: {}",
            invocation.display(),
            output.exit_code,
            output.stderr_text()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_collects_output() {
        let invocation = CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let output = run_command(&invocation, None).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, vec!["out"]);
        assert_eq!(output.stderr, vec!["err"]);
    }

    #[tokio::test]
    async fn test_run_checked_maps_failure() {
        let invocation = CommandSpec::new("sh").args(["-c", "exit 1"]);
        let err = run_checked(&invocation, None, ExecutorError::Image).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Image(_)));

        let invocation = CommandSpec::new("cat").stdin("piped");
        let output = run_checked(&invocation, None, ExecutorError::Image).await.unwrap();
        assert_eq!(output.stdout, vec!["piped"]);
    }
}
