//! Fetcher：调用点提供的无参异步获取操作
//!
//! 协调器不自己构造 HTTP 请求，只编排传入的 fetcher。返回 Future 的闭包自动实现该 trait。

use std::future::Future;

use async_trait::async_trait;

use crate::core::RawFailure;

#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, RawFailure>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, RawFailure>> + Send + 'static,
{
    async fn fetch(&self) -> Result<T, RawFailure> {
        (self)().await
    }
}
