//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DASH__*` 覆盖（双下划线表示嵌套，如 `DASH__API__BASE_URL=https://api.example.com/api`）。
//! 配置只在启动时读取一次。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub mutation: MutationSection,
}

/// [api] 段：后端地址与请求超时
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// [query] 段：缓存窗口、重试次数与重新获取开关
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    /// Fresh -> Stale 的窗口（毫秒）
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,
    /// 闲置多久后整体移除（毫秒）
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,
    /// 总尝试次数（含首次）
    #[serde(default = "default_query_retry")]
    pub retry: u32,
    #[serde(default = "default_true")]
    pub refetch_on_reconnect: bool,
    #[serde(default)]
    pub refetch_on_window_focus: bool,
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
}

fn default_stale_time_ms() -> u64 {
    5 * 60 * 1000
}

fn default_gc_time_ms() -> u64 {
    10 * 60 * 1000
}

fn default_query_retry() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_gc_interval_ms() -> u64 {
    60 * 1000
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            gc_time_ms: default_gc_time_ms(),
            retry: default_query_retry(),
            refetch_on_reconnect: true,
            refetch_on_window_focus: false,
            gc_interval_ms: default_gc_interval_ms(),
        }
    }
}

/// [mutation] 段
#[derive(Debug, Clone, Deserialize)]
pub struct MutationSection {
    #[serde(default = "default_mutation_retry")]
    pub retry: u32,
}

fn default_mutation_retry() -> u32 {
    1
}

impl Default for MutationSection {
    fn default() -> Self {
        Self {
            retry: default_mutation_retry(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 DASH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DASH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DASH")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.api.base_url, "http://localhost:8000/api");
        assert_eq!(cfg.query.stale_time_ms, 300_000);
        assert_eq!(cfg.query.gc_time_ms, 600_000);
        assert_eq!(cfg.query.retry, 3);
        assert!(cfg.query.refetch_on_reconnect);
        assert!(!cfg.query.refetch_on_window_focus);
        assert_eq!(cfg.mutation.retry, 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"https://dash.example.org/api\"\n\n[query]\nstale_time_ms = 1000\nretry = 5\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.api.base_url, "https://dash.example.org/api");
        assert_eq!(cfg.api.timeout_secs, 30);
        assert_eq!(cfg.query.stale_time_ms, 1000);
        assert_eq!(cfg.query.retry, 5);
        assert_eq!(cfg.query.gc_time_ms, 600_000);
        assert_eq!(cfg.mutation.retry, 1);
    }
}
