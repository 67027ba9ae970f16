//! Chapter Dash 命令行
//!
//! 入口：加载配置、初始化日志，通过协调器并发获取给定路径（默认 dashboard/）并输出 JSON。
//! 失败时输出面向用户的文案并以非零状态退出。

use std::sync::Arc;

use anyhow::Context;
use chapter_dash::api::{routes, ApiClient};
use chapter_dash::config::load_config;
use chapter_dash::core::{
    to_user_message, CoordinatorConfig, RequestCoordinator, RequestError, RequestOptions,
    ShutdownManager, ShutdownReason, TracingObserver,
};
use futures_util::future::join_all;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chapter_dash::observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let api = ApiClient::new(&config.api).context("Failed to build HTTP client")?;
    tracing::info!(base_url = api.base_url(), "Backend configured");

    let coordinator: RequestCoordinator =
        RequestCoordinator::with_observer(CoordinatorConfig::from(&config), Arc::new(TracingObserver));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let sweeper = coordinator.spawn_gc_sweeper(shutdown.token());

    let mut paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        paths.push(routes::dashboard());
    }

    let options = RequestOptions::new().with_cancel(shutdown.token());
    let requests = paths.iter().map(|path| {
        coordinator.request(path.clone(), api.get(path.clone()), options.clone())
    });
    let results = join_all(requests).await;
    if shutdown.is_shutdown() {
        tracing::warn!("Interrupted before all requests finished");
    }

    let mut failed = false;
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(value) => {
                let pretty = serde_json::to_string_pretty(&value)?;
                println!("{pretty}");
            }
            Err(RequestError::Cancelled { .. }) => {
                eprintln!("{path}: cancelled");
                failed = true;
            }
            Err(RequestError::Failed(err)) => {
                eprintln!("{path}: {}", to_user_message(&err));
                failed = true;
            }
        }
    }

    shutdown.shutdown(ShutdownReason::Completed);
    let _ = sweeper.await;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
