//! 请求缓存与重试协调器
//!
//! - 新鲜命中直接返回缓存，不调用 fetcher
//! - Stale / 缺失 / Error 时发起获取；同 key 并发请求共享同一次获取
//! - 获取失败按 RetryPolicy 指数退避重试，4xx 直接终止
//! - 终止失败写入 Error 状态并上报 FailureObserver
//! - 调用方的 CancellationToken 触发后不再等待；全部等待者离开时取消获取，迟到的响应不写回缓存
//!
//! 协调器显式构造并通过 Clone（内部 Arc）传递，不存在全局单例。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::cache::{CacheEntry, CacheStore, Flight, FlightShared, Outcome};
use crate::core::normalizer::classify;
use crate::core::{
    CacheSnapshot, EntryState, FailureObserver, FailureReport, Fetcher, NormalizedError,
    RequestError, RetryPolicy, TracingObserver,
};

/// 协调器默认配置
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub query_retry: RetryPolicy,
    pub mutation_retry: RetryPolicy,
    pub refetch_on_reconnect: bool,
    pub refetch_on_window_focus: bool,
    /// 后台 GC 扫描间隔
    pub gc_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            gc_time: Duration::from_secs(10 * 60),
            query_retry: RetryPolicy::query(),
            mutation_retry: RetryPolicy::mutation(),
            refetch_on_reconnect: true,
            refetch_on_window_focus: false,
            gc_interval: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            stale_time: Duration::from_millis(cfg.query.stale_time_ms),
            gc_time: Duration::from_millis(cfg.query.gc_time_ms),
            query_retry: RetryPolicy::new(cfg.query.retry),
            mutation_retry: RetryPolicy::new(cfg.mutation.retry),
            refetch_on_reconnect: cfg.query.refetch_on_reconnect,
            refetch_on_window_focus: cfg.query.refetch_on_window_focus,
            gc_interval: Duration::from_millis(cfg.query.gc_interval_ms.max(1)),
        }
    }
}

/// 单次查询的选项；未设置的字段取协调器默认值
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// 调用方界面的取消令牌
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_time(mut self, d: Duration) -> Self {
        self.stale_time = Some(d);
        self
    }

    pub fn gc_time(mut self, d: Duration) -> Self {
        self.gc_time = Some(d);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// 变更（POST / PUT / DELETE）的选项
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// 上报时使用的上下文，如 "delete-report"
    pub context: Option<String>,
    pub retry: Option<RetryPolicy>,
    /// 成功后失效的 key 前缀
    pub invalidates: Vec<String>,
    pub cancel: Option<CancellationToken>,
}

impl MutationOptions {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..Self::default()
        }
    }

    pub fn invalidates(mut self, prefix: impl Into<String>) -> Self {
        self.invalidates.push(prefix.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// 宿主环境事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Reconnected,
    WindowFocused,
}

struct Inner<T> {
    store: Mutex<CacheStore<T>>,
    config: CoordinatorConfig,
    observer: Arc<dyn FailureObserver>,
}

impl<T> Inner<T> {
    fn store(&self) -> MutexGuard<'_, CacheStore<T>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RequestCoordinator<T = Value> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Begin<T> {
    Hit(T),
    Wait {
        rx: watch::Receiver<Option<Outcome<T>>>,
        guard: WaiterGuard<T>,
    },
}

enum Waited<T> {
    Done(Outcome<T>),
    /// 获取被取消（失效 / 移除），需重新发起
    Aborted,
    Cancelled,
}

/// 等待者离开时（完成、取消或 future 被丢弃）递减计数；最后一个离开的等待者取消获取
struct WaiterGuard<T> {
    inner: Arc<Inner<T>>,
    key: String,
    flight_id: u64,
    shared: Arc<FlightShared>,
}

impl<T> Drop for WaiterGuard<T> {
    fn drop(&mut self) {
        let mut store = self.inner.store();
        if !self.shared.leave() {
            return;
        }
        self.shared.cancel.cancel();
        let Some(entry) = store.entries.get_mut(&self.key) else {
            return;
        };
        if !entry.flight.as_ref().is_some_and(|f| f.id == self.flight_id) {
            return;
        }
        entry.flight = None;
        if entry.settle_without_result().is_none() {
            store.entries.remove(&self.key);
        }
        tracing::debug!(key = %self.key, "All waiters left, fetch abandoned");
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: CoordinatorConfig, observer: Arc<dyn FailureObserver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(CacheStore::new()),
                config,
                observer,
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// 查询：新鲜命中返回缓存，否则（或加入进行中的）获取
    pub async fn request<F>(
        &self,
        key: impl Into<String>,
        fetcher: F,
        options: RequestOptions,
    ) -> Result<T, RequestError>
    where
        F: Fetcher<T> + 'static,
    {
        let key = key.into();
        let fetcher = Arc::new(fetcher);
        loop {
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(RequestError::Cancelled { key });
            }
            let (rx, guard) = match self.begin(&key, &fetcher, &options) {
                Begin::Hit(value) => return Ok(value),
                Begin::Wait { rx, guard } => (rx, guard),
            };
            let waited = wait_for_outcome(rx, options.cancel.as_ref()).await;
            drop(guard);
            match waited {
                Waited::Done(outcome) => return outcome.map_err(RequestError::from),
                Waited::Cancelled => {
                    tracing::debug!(key = %key, "Request cancelled by caller");
                    return Err(RequestError::Cancelled { key });
                }
                Waited::Aborted => {
                    tracing::debug!(key = %key, "In-flight fetch aborted, re-requesting");
                }
            }
        }
    }

    /// 在锁内决定：命中 / 加入已有获取 / 发起新获取
    fn begin<F>(&self, key: &str, fetcher: &Arc<F>, options: &RequestOptions) -> Begin<T>
    where
        F: Fetcher<T> + 'static,
    {
        let config = &self.inner.config;
        let stale_time = options.stale_time.unwrap_or(config.stale_time);
        let gc_time = options.gc_time.unwrap_or(config.gc_time);
        let policy = options.retry.unwrap_or(config.query_retry);
        let now = Instant::now();

        let mut store = self.inner.store();
        if store.evict_if_expired(key, now) {
            tracing::debug!(key, "Evicted expired entry on access");
        }
        let flight_id = store.next_flight_id();
        let entry = store
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::empty(key.to_string(), now, stale_time, gc_time));
        entry.last_used = now;
        entry.stale_time = stale_time;
        entry.gc_time = entry.gc_time.max(gc_time);

        if entry.is_fresh(now, stale_time) {
            if let Some(value) = &entry.value {
                tracing::debug!(key, "Cache hit");
                return Begin::Hit(value.clone());
            }
        }

        if let Some(flight) = &entry.flight {
            if !flight.shared.cancel.is_cancelled() {
                tracing::debug!(key, "Joining in-flight fetch");
                flight.shared.join();
                return Begin::Wait {
                    rx: flight.rx.clone(),
                    guard: WaiterGuard {
                        inner: Arc::clone(&self.inner),
                        key: key.to_string(),
                        flight_id: flight.id,
                        shared: Arc::clone(&flight.shared),
                    },
                };
            }
        }

        let (tx, rx) = watch::channel(None);
        let shared = Arc::new(FlightShared::default());
        shared.join();
        entry.flight = Some(Flight {
            id: flight_id,
            rx: rx.clone(),
            shared: Arc::clone(&shared),
        });
        entry.state = EntryState::InFlight;
        drop(store);

        tracing::debug!(key, flight_id, "Fetching");
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let task_fetcher = Arc::clone(fetcher);
        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = task_shared.cancel.cancelled() => return,
                outcome = run_with_retry(task_fetcher.as_ref(), &policy, &task_key) => outcome,
            };
            if complete_flight(&inner, &task_key, flight_id, &task_shared, &outcome) {
                if let Err(err) = &outcome {
                    report(&inner, err, Some(task_key.clone()));
                }
            }
            let _ = tx.send(Some(outcome));
        });

        Begin::Wait {
            rx,
            guard: WaiterGuard {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                flight_id,
                shared,
            },
        }
    }

    /// 变更：不缓存，按变更重试策略执行；成功后失效相关前缀
    pub async fn mutate<R, F>(&self, fetcher: F, options: MutationOptions) -> Result<R, RequestError>
    where
        R: Send + 'static,
        F: Fetcher<R>,
    {
        let policy = options.retry.unwrap_or(self.inner.config.mutation_retry);
        let label = options.context.clone().unwrap_or_else(|| "mutation".to_string());
        let cancelled = RequestError::Cancelled { key: label.clone() };

        let outcome = match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled),
                outcome = run_with_retry(&fetcher, &policy, &label) => outcome,
            },
            None => run_with_retry(&fetcher, &policy, &label).await,
        };

        match outcome {
            Ok(value) => {
                for prefix in &options.invalidates {
                    self.invalidate_prefix(prefix);
                }
                Ok(value)
            }
            Err(err) => {
                report(&self.inner, &err, options.context.clone());
                Err(err.into())
            }
        }
    }

    /// 标记为 Stale，下次访问时重新获取；进行中的获取被取消。返回 key 是否存在
    pub fn invalidate(&self, key: &str) -> bool {
        let mut store = self.inner.store();
        let Some(entry) = store.entries.get_mut(key) else {
            return false;
        };
        if !invalidate_entry(entry) {
            store.entries.remove(key);
        }
        true
    }

    /// 失效所有以 prefix 开头的 key，返回数量
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut store = self.inner.store();
        let mut count = 0;
        store.entries.retain(|key, entry| {
            if !key.starts_with(prefix) {
                return true;
            }
            count += 1;
            invalidate_entry(entry)
        });
        if count > 0 {
            tracing::debug!(prefix, count, "Invalidated entries");
        }
        count
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut store = self.inner.store();
        match store.entries.remove(key) {
            Some(mut entry) => {
                entry.detach_flight();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut store = self.inner.store();
        for entry in store.entries.values_mut() {
            entry.detach_flight();
        }
        store.entries.clear();
    }

    /// 直接写入数据（如变更接口已返回最新对象）；进行中的获取被取消，等待者会读到此值
    pub fn set_data(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        let config = &self.inner.config;
        let now = Instant::now();
        let mut store = self.inner.store();
        let entry = store.entries.entry(key.clone()).or_insert_with(|| {
            CacheEntry::empty(key, now, config.stale_time, config.gc_time)
        });
        entry.detach_flight();
        entry.value = Some(value);
        entry.fetched_at = Some(now);
        entry.last_used = now;
        entry.error = None;
        entry.state = EntryState::Fresh;
    }

    /// 任意状态下的缓存值，不触发获取
    pub fn get_data(&self, key: &str) -> Option<T> {
        self.snapshot(key).and_then(|s| s.value)
    }

    pub fn snapshot(&self, key: &str) -> Option<CacheSnapshot<T>> {
        let now = Instant::now();
        let mut store = self.inner.store();
        store.evict_if_expired(key, now);
        store.entries.get(key).map(|e| e.snapshot(now))
    }

    /// 全部条目快照，按 key 排序
    pub fn snapshots(&self) -> Vec<CacheSnapshot<T>> {
        let now = Instant::now();
        let mut store = self.inner.store();
        store.collect_garbage(now);
        let mut all: Vec<_> = store.entries.values().map(|e| e.snapshot(now)).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn len(&self) -> usize {
        self.inner.store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 移除闲置超过 gc 窗口的条目，返回移除数量
    pub fn collect_garbage(&self) -> usize {
        let removed = self.inner.store().collect_garbage(Instant::now());
        if removed > 0 {
            tracing::info!(removed, "Evicted idle cache entries");
        }
        removed
    }

    /// 后台定期 GC，token 取消后退出
    pub fn spawn_gc_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.inner.config.gc_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("GC sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.collect_garbage();
                    }
                }
            }
        })
    }

    /// 网络恢复：refetch_on_reconnect 开启时所有 Fresh 条目转为 Stale
    pub fn on_reconnect(&self) -> usize {
        if !self.inner.config.refetch_on_reconnect {
            return 0;
        }
        let count = self.mark_all_stale();
        tracing::info!(count, "Network reconnected, entries marked stale");
        count
    }

    /// 窗口重新获得焦点：refetch_on_window_focus 开启时同上
    pub fn on_window_focus(&self) -> usize {
        if !self.inner.config.refetch_on_window_focus {
            return 0;
        }
        self.mark_all_stale()
    }

    pub fn handle_event(&self, event: SurfaceEvent) -> usize {
        match event {
            SurfaceEvent::Reconnected => self.on_reconnect(),
            SurfaceEvent::WindowFocused => self.on_window_focus(),
        }
    }

    fn mark_all_stale(&self) -> usize {
        let mut store = self.inner.store();
        let mut count = 0;
        for entry in store.entries.values_mut() {
            if entry.mark_stale() {
                count += 1;
            }
        }
        count
    }
}

/// 失效单个条目，返回是否保留（首次获取中被失效的空条目应删除）
fn invalidate_entry<T>(entry: &mut CacheEntry<T>) -> bool {
    if entry.detach_flight() {
        return entry.settle_without_result().is_some();
    }
    entry.mark_stale();
    true
}

/// 获取完成后写回缓存；条目已被摘下或取消时丢弃结果，返回是否写回
fn complete_flight<T: Clone>(
    inner: &Inner<T>,
    key: &str,
    flight_id: u64,
    shared: &FlightShared,
    outcome: &Outcome<T>,
) -> bool {
    let mut store = inner.store();
    let Some(entry) = store.entries.get_mut(key) else {
        tracing::debug!(key, "Discarding response for removed entry");
        return false;
    };
    let owns_entry = entry.flight.as_ref().is_some_and(|f| f.id == flight_id);
    if !owns_entry || shared.cancel.is_cancelled() {
        tracing::debug!(key, "Discarding late response");
        return false;
    }
    let now = Instant::now();
    entry.flight = None;
    entry.last_used = now;
    match outcome {
        Ok(value) => {
            entry.value = Some(value.clone());
            entry.fetched_at = Some(now);
            entry.error = None;
            entry.state = EntryState::Fresh;
        }
        Err(err) => {
            entry.error = Some(err.clone());
            entry.state = EntryState::Error;
        }
    }
    true
}

fn report<T>(inner: &Inner<T>, err: &NormalizedError, context: Option<String>) {
    inner
        .observer
        .on_terminal_failure(&FailureReport::new(err.clone(), context));
}

async fn wait_for_outcome<T: Clone>(
    mut rx: watch::Receiver<Option<Outcome<T>>>,
    cancel: Option<&CancellationToken>,
) -> Waited<T> {
    loop {
        let ready = rx.borrow_and_update().clone();
        if let Some(outcome) = ready {
            return Waited::Done(outcome);
        }
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancelled => return Waited::Cancelled,
            changed = rx.changed() => {
                if changed.is_err() {
                    let last = rx.borrow().clone();
                    return match last {
                        Some(outcome) => Waited::Done(outcome),
                        None => Waited::Aborted,
                    };
                }
            }
        }
    }
}

/// 调用 fetcher，失败时归一化并按策略退避重试
async fn run_with_retry<R, F>(fetcher: &F, policy: &RetryPolicy, key: &str) -> Result<R, NormalizedError>
where
    F: Fetcher<R> + ?Sized,
{
    let mut attempt = 1;
    loop {
        match fetcher.fetch().await {
            Ok(value) => return Ok(value),
            Err(raw) => {
                let err = classify(&raw);
                let plan = policy.plan(attempt, &err);
                if !plan.should_retry {
                    tracing::debug!(key, attempt, classification = %err.classification, "Fetch failed terminally");
                    return Err(err);
                }
                tracing::debug!(
                    key,
                    attempt,
                    delay_ms = plan.delay_ms,
                    "Fetch failed, retrying: {}",
                    err.message
                );
                tokio::time::sleep(plan.delay()).await;
                attempt += 1;
            }
        }
    }
}
