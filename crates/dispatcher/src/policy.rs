use executor_config::DispatcherConfig;
use std::time::Duration;

/// 单个任务类型的执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 包括首次执行在内的最大尝试次数
    pub max_attempts: u32,
    /// 每次尝试的超时时间
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
        }
    }

    pub fn attempts(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// 镜像构建、市场 slug 与分享任务: 失败后重试一次
    pub fn build_with_retry(config: &DispatcherConfig) -> Self {
        Self::attempts(2, Duration::from_secs(config.build_timeout_seconds))
    }

    /// 源码构建会重新拉取代码, 只执行一次
    pub fn build_once(config: &DispatcherConfig) -> Self {
        Self::once(Duration::from_secs(config.build_timeout_seconds))
    }

    pub fn generic(config: &DispatcherConfig) -> Self {
        Self::once(Duration::from_secs(config.generic_timeout_seconds))
    }

    pub fn has_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_from_config() {
        let config = DispatcherConfig::default();
        let retry = RetryPolicy::build_with_retry(&config);
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.timeout, Duration::from_secs(1800));
        assert!(retry.has_retry_after(1));
        assert!(!retry.has_retry_after(2));

        assert_eq!(RetryPolicy::build_once(&config).max_attempts, 1);
        assert_eq!(
            RetryPolicy::generic(&config).timeout,
            Duration::from_secs(600)
        );
        assert_eq!(RetryPolicy::attempts(0, Duration::ZERO).max_attempts, 1);
    }
}
