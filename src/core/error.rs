//! 错误类型：原始失败形态、归一化错误与请求错误
//!
//! 与 normalizer 配合：任何 RawFailure 经 classify 后得到唯一的 NormalizedError；
//! 协调器对外只暴露 RequestError。

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// 失败分类（封闭集合，下游按此穷举匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// 请求未收到任何响应
    Network,
    InvalidInput,
    TooLarge,
    Processing,
    RateLimited,
    NotFound,
    Forbidden,
    Server,
    Unknown,
}

impl ErrorClass {
    /// 稳定的分类码（日志 / 遥测使用）
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::InvalidInput => "INVALID_FILE_FORMAT",
            Self::TooLarge => "FILE_TOO_LARGE",
            Self::Processing => "PROCESSING_ERROR",
            Self::RateLimited => "RATE_LIMIT_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Server => "SERVER_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// 服务端 `code` 字段到分类的固定映射；未知 code 返回 None，交由状态码决定
    pub fn from_server_code(code: &str) -> Option<Self> {
        match code {
            "NETWORK_ERROR" => Some(Self::Network),
            "INVALID_FILE_FORMAT" => Some(Self::InvalidInput),
            "FILE_TOO_LARGE" => Some(Self::TooLarge),
            "PROCESSING_ERROR" => Some(Self::Processing),
            "RATE_LIMIT_ERROR" => Some(Self::RateLimited),
            _ => None,
        }
    }

    /// 无 code 时按 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            403 => Self::Forbidden,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// 请求失败的原始形态（fetcher 返回的错误）
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// 完成了 HTTP 往返，带状态码与（可能为空的）响应体
    Response { status: u16, body: Option<Value> },
    /// 请求已发出但没有收到响应（连接失败、超时等）
    NoResponse { message: String },
    /// 其它任意失败值
    Other(Value),
}

impl RawFailure {
    pub fn response(status: u16, body: Value) -> Self {
        Self::Response {
            status,
            body: Some(body),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Response { status, body: None }
    }

    pub fn no_response(message: impl Into<String>) -> Self {
        Self::NoResponse {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(Value::String(message.into()))
    }
}

impl From<reqwest::Error> for RawFailure {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Response {
                status: status.as_u16(),
                body: None,
            };
        }
        if e.is_connect() || e.is_timeout() || e.is_request() {
            return Self::NoResponse {
                message: e.to_string(),
            };
        }
        Self::Other(Value::String(e.to_string()))
    }
}

/// 归一化后的失败记录；message 保证非空
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct NormalizedError {
    pub status_code: Option<u16>,
    pub message: String,
    pub classification: ErrorClass,
    pub details: Option<Map<String, Value>>,
}

impl NormalizedError {
    pub fn new(classification: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            classification,
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// 401：需要重新认证
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == Some(401)
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code.is_some_and(|s| s >= 500)
    }

    /// 4xx 属于客户端请求错误，重试无法修复
    pub fn is_client_error(&self) -> bool {
        self.status_code.is_some_and(|s| (400..500).contains(&s))
    }
}

/// 协调器返回给调用方的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error(transparent)]
    Failed(#[from] NormalizedError),

    /// 调用方所在界面已销毁，结果被丢弃
    #[error("Request cancelled: {key}")]
    Cancelled { key: String },
}

impl RequestError {
    /// 终止失败时的归一化错误；取消时为 None
    pub fn normalized(&self) -> Option<&NormalizedError> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_code_table() {
        assert_eq!(ErrorClass::from_server_code("NETWORK_ERROR"), Some(ErrorClass::Network));
        assert_eq!(
            ErrorClass::from_server_code("INVALID_FILE_FORMAT"),
            Some(ErrorClass::InvalidInput)
        );
        assert_eq!(ErrorClass::from_server_code("FILE_TOO_LARGE"), Some(ErrorClass::TooLarge));
        assert_eq!(
            ErrorClass::from_server_code("PROCESSING_ERROR"),
            Some(ErrorClass::Processing)
        );
        assert_eq!(
            ErrorClass::from_server_code("RATE_LIMIT_ERROR"),
            Some(ErrorClass::RateLimited)
        );
        assert_eq!(ErrorClass::from_server_code("SOMETHING_ELSE"), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorClass::from_status(404), ErrorClass::NotFound);
        assert_eq!(ErrorClass::from_status(403), ErrorClass::Forbidden);
        assert_eq!(ErrorClass::from_status(500), ErrorClass::Server);
        assert_eq!(ErrorClass::from_status(503), ErrorClass::Server);
        assert_eq!(ErrorClass::from_status(599), ErrorClass::Server);
        assert_eq!(ErrorClass::from_status(401), ErrorClass::Unknown);
        assert_eq!(ErrorClass::from_status(429), ErrorClass::Unknown);
        assert_eq!(ErrorClass::from_status(600), ErrorClass::Unknown);
    }

    #[test]
    fn test_status_predicates() {
        let err = NormalizedError::new(ErrorClass::Unknown, "x").with_status(401);
        assert!(err.is_unauthorized());
        assert!(err.is_client_error());
        assert!(!err.is_server_error());

        let err = NormalizedError::new(ErrorClass::Server, "x").with_status(502);
        assert!(err.is_server_error());
        assert!(!err.is_client_error());

        let err = NormalizedError::new(ErrorClass::Network, "x");
        assert!(!err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_request_error_display() {
        let err: RequestError = NormalizedError::new(ErrorClass::Server, "boom").into();
        assert_eq!(err.to_string(), "boom");
        assert!(err.normalized().is_some());

        let err = RequestError::Cancelled {
            key: "dashboard/".to_string(),
        };
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("dashboard/"));
    }
}
