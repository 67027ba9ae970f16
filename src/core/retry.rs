//! 重试策略：带上限的指数退避 + 按状态码短路
//!
//! 第 n 次尝试失败后（n 从 1 开始）等待 min(base * 2^(n-1), max) 毫秒再发起下一次；
//! 4xx 一律不重试（包括 429）。

use std::time::Duration;

use crate::core::NormalizedError;

/// 单次失败后计算出的重试计划（不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// 刚刚失败的是第几次尝试（>= 1）
    pub attempt_number: u32,
    pub delay_ms: u64,
    pub should_retry: bool,
}

impl RetryPlan {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: Self::DEFAULT_BASE_DELAY_MS,
            max_delay_ms: Self::DEFAULT_MAX_DELAY_MS,
        }
    }

    /// 查询默认：3 次
    pub fn query() -> Self {
        Self::new(3)
    }

    /// 变更默认：1 次
    pub fn mutation() -> Self {
        Self::new(1)
    }

    /// 第 attempt 次失败后的等待时长
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1);
        let factor = 2u64.checked_pow(exp).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// 4xx 是客户端请求错误，重试无法修复；无状态码（网络）与 5xx 可重试
    pub fn is_retryable(error: &NormalizedError) -> bool {
        !error.is_client_error()
    }

    pub fn plan(&self, attempt: u32, error: &NormalizedError) -> RetryPlan {
        let attempt = attempt.max(1);
        RetryPlan {
            attempt_number: attempt,
            delay_ms: self.delay_ms(attempt),
            should_retry: attempt < self.max_attempts && Self::is_retryable(error),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::query()
    }
}
