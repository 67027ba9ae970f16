//! 终止失败观察者
//!
//! 协调器在每次终止失败时调用 FailureObserver；自身不做任何界面动作。
//! 默认实现 TracingObserver 写日志，并区分 401（需重新认证）与 5xx。

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::core::NormalizedError;

/// 一次终止失败的上报记录
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub error: NormalizedError,
    /// 调用点上下文（通常是请求 key 或变更名称）
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(error: NormalizedError, context: Option<String>) -> Self {
        Self {
            error,
            context,
            timestamp: Utc::now(),
        }
    }
}

pub trait FailureObserver: Send + Sync {
    fn on_terminal_failure(&self, report: &FailureReport);
}

/// 以 tracing 记录终止失败
#[derive(Debug, Default)]
pub struct TracingObserver;

impl FailureObserver for TracingObserver {
    fn on_terminal_failure(&self, report: &FailureReport) {
        let err = &report.error;
        let context = report.context.as_deref().unwrap_or("-");
        let timestamp = report.timestamp.to_rfc3339();
        if err.is_unauthorized() {
            tracing::warn!(
                context,
                timestamp = %timestamp,
                "Authentication required: {}",
                err.message
            );
        } else if err.is_server_error() {
            tracing::error!(
                context,
                timestamp = %timestamp,
                status = ?err.status_code,
                classification = %err.classification,
                details = ?err.details,
                "Server error: {}",
                err.message
            );
        } else {
            tracing::warn!(
                context,
                timestamp = %timestamp,
                status = ?err.status_code,
                classification = %err.classification,
                "Request failed: {}",
                err.message
            );
        }
    }
}

/// 收集所有上报，供界面轮询或测试断言
#[derive(Debug, Default)]
pub struct RecordingObserver {
    reports: Mutex<Vec<FailureReport>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureObserver for RecordingObserver {
    fn on_terminal_failure(&self, report: &FailureReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorClass;

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        assert!(observer.is_empty());

        let err = NormalizedError::new(ErrorClass::Unknown, "Unauthorized").with_status(401);
        observer.on_terminal_failure(&FailureReport::new(err, Some("chapters/".to_string())));

        let reports = observer.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].error.is_unauthorized());
        assert_eq!(reports[0].context.as_deref(), Some("chapters/"));
    }

    #[test]
    fn test_tracing_observer_does_not_panic() {
        let observer = TracingObserver;
        for err in [
            NormalizedError::new(ErrorClass::Unknown, "auth").with_status(401),
            NormalizedError::new(ErrorClass::Server, "down").with_status(503),
            NormalizedError::new(ErrorClass::Network, "offline"),
        ] {
            observer.on_terminal_failure(&FailureReport::new(err, None));
        }
    }
}
