//! Chapter Dash - 分会看板客户端核心
//!
//! 模块划分：
//! - **api**: 后端 HTTP 客户端与资源路径（路径即缓存 key）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误归一化、重试策略、请求缓存协调器、用户文案、取消作用域
//! - **observability**: 日志初始化

pub mod api;
pub mod config;
pub mod core;
pub mod observability;

pub use crate::core::{
    classify, to_user_message, NormalizedError, RequestCoordinator, RequestError, RequestOptions,
};
