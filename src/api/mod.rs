//! 后端 HTTP 客户端
//!
//! 基于 reqwest；base_url 启动时读取一次。非 2xx 响应转为 RawFailure::Response（响应体尽量按 JSON 解析），
//! 未收到响应的失败转为 RawFailure::NoResponse，交给协调器归一化与重试。

pub mod routes;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use crate::config::ApiSection;
use crate::core::{Fetcher, RawFailure};

/// 后端 API 客户端（Clone 廉价，内部共享连接池）
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(section: &ApiSection) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拼接 base_url 与相对路径（路径即缓存 key）
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, RawFailure> {
        self.send(self.client.get(self.url(path))).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RawFailure> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> Result<Value, RawFailure> {
        self.send(self.client.put(self.url(path)).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), RawFailure> {
        self.send(self.client.delete(self.url(path))).await.map(|_| ())
    }

    /// 供协调器使用的 GET fetcher
    pub fn get(&self, path: impl Into<String>) -> GetJson {
        GetJson {
            client: self.clone(),
            path: path.into(),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RawFailure> {
        let resp = request.send().await?;
        let status = resp.status();

        if status.is_success() {
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                RawFailure::Other(json!({ "message": format!("Invalid JSON response: {e}") }))
            });
        }

        tracing::debug!(status = status.as_u16(), "Backend returned error status");
        // 错误体读取失败也保留状态码
        match resp.text().await {
            Ok(text) => Err(RawFailure::Response {
                status: status.as_u16(),
                body: parse_error_body(&text),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read error body");
                Err(RawFailure::status(status.as_u16()))
            }
        }
    }
}

/// 错误响应体：JSON 优先，否则保留原始文本
fn parse_error_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

/// 对单个路径发起 GET 的 fetcher
#[derive(Debug, Clone)]
pub struct GetJson {
    client: ApiClient,
    path: String,
}

impl GetJson {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Fetcher<Value> for GetJson {
    async fn fetch(&self) -> Result<Value, RawFailure> {
        self.client.get_json(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&ApiSection {
            base_url: base.to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_url_join() {
        let api = client("http://localhost:8000/api/");
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert_eq!(api.url("dashboard/"), "http://localhost:8000/api/dashboard/");
        assert_eq!(api.url("/chapters/3/"), "http://localhost:8000/api/chapters/3/");
    }

    #[test]
    fn test_parse_error_body() {
        assert_eq!(parse_error_body(""), None);
        assert_eq!(
            parse_error_body(r#"{"error": "Chapter not found"}"#),
            Some(json!({"error": "Chapter not found"}))
        );
        assert_eq!(
            parse_error_body("<html>Bad Gateway</html>"),
            Some(Value::String("<html>Bad Gateway</html>".to_string()))
        );
    }

    #[tokio::test]
    async fn test_error_status_survives_truncated_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // 声明 200 字节，只写一部分后断开
            socket
                .write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n{\"error\":",
                )
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });

        let api = client(&format!("http://{addr}/api"));
        let raw = api.get_json("chapters/99/").await.unwrap_err();
        assert!(
            matches!(raw, RawFailure::Response { status: 404, body: None }),
            "{raw:?}"
        );

        let err = crate::core::classify(&raw);
        assert_eq!(err.classification, crate::core::ErrorClass::NotFound);
        assert!(!crate::core::RetryPolicy::query().plan(1, &err).should_retry);
    }

    #[test]
    fn test_get_fetcher_keeps_path() {
        let api = client("http://localhost:8000/api");
        assert_eq!(api.get("chapters/").path(), "chapters/");
    }
}
