//! 缓存条目与存储
//!
//! 条目只由 RequestCoordinator 持有和修改；界面拿到的是 CacheSnapshot 只读副本。
//! 状态机：EMPTY -> InFlight -> {Fresh, Error}；Fresh -> Stale（到期或重连）；
//! Stale / Error -> InFlight（下次访问）；任意状态闲置超过 gc 窗口后被整体移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::NormalizedError;

/// 条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryState {
    Fresh,
    Stale,
    InFlight,
    Error,
}

/// 界面可见的只读快照
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
    pub key: String,
    pub value: Option<T>,
    pub state: EntryState,
    pub fetched_at: Option<Instant>,
    pub error: Option<NormalizedError>,
}

impl<T> CacheSnapshot<T> {
    /// 距上次成功获取的时长
    pub fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed())
    }
}

pub(crate) type Outcome<T> = Result<T, NormalizedError>;

/// 一次进行中的获取（同 key 的并发请求共享）
pub(crate) struct Flight<T> {
    pub id: u64,
    pub rx: watch::Receiver<Option<Outcome<T>>>,
    pub shared: Arc<FlightShared>,
}

/// 等待者计数与取消令牌；计数只在持有存储锁时修改
#[derive(Debug, Default)]
pub(crate) struct FlightShared {
    pub waiters: AtomicUsize,
    pub cancel: CancellationToken,
}

impl FlightShared {
    pub fn join(&self) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
    }

    /// 返回是否为最后一个等待者
    pub fn leave(&self) -> bool {
        self.waiters.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

pub(crate) struct CacheEntry<T> {
    pub key: String,
    pub value: Option<T>,
    pub fetched_at: Option<Instant>,
    pub last_used: Instant,
    pub state: EntryState,
    pub error: Option<NormalizedError>,
    /// 最近一次请求使用的新鲜窗口（快照判断 Stale 用）
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub flight: Option<Flight<T>>,
}

impl<T> CacheEntry<T> {
    pub fn empty(key: String, now: Instant, stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            key,
            value: None,
            fetched_at: None,
            last_used: now,
            state: EntryState::Stale,
            error: None,
            stale_time,
            gc_time,
            flight: None,
        }
    }

    /// 按给定窗口判断是否仍新鲜
    pub fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
        self.state == EntryState::Fresh
            && self.value.is_some()
            && self
                .fetched_at
                .is_some_and(|t| now.saturating_duration_since(t) < stale_time)
    }

    pub fn effective_state(&self, now: Instant) -> EntryState {
        match self.state {
            EntryState::Fresh if !self.is_fresh(now, self.stale_time) => EntryState::Stale,
            state => state,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.flight.is_none() && now.saturating_duration_since(self.last_used) > self.gc_time
    }

    /// 取消并摘下进行中的获取；其迟到的响应不会再写回
    pub fn detach_flight(&mut self) -> bool {
        match self.flight.take() {
            Some(flight) => {
                flight.shared.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 离开 InFlight 后回到的状态；无值也无错误时返回 None（条目应删除）
    pub fn settle_without_result(&mut self) -> Option<EntryState> {
        self.state = if self.value.is_some() {
            EntryState::Stale
        } else if self.error.is_some() {
            EntryState::Error
        } else {
            return None;
        };
        Some(self.state)
    }

    pub fn mark_stale(&mut self) -> bool {
        if self.state == EntryState::Fresh {
            self.state = EntryState::Stale;
            true
        } else {
            false
        }
    }
}

impl<T: Clone> CacheEntry<T> {
    pub fn snapshot(&self, now: Instant) -> CacheSnapshot<T> {
        CacheSnapshot {
            key: self.key.clone(),
            value: self.value.clone(),
            state: self.effective_state(now),
            fetched_at: self.fetched_at,
            error: self.error.clone(),
        }
    }
}

/// key -> 条目
pub(crate) struct CacheStore<T> {
    pub entries: HashMap<String, CacheEntry<T>>,
    next_flight_id: u64,
}

impl<T> CacheStore<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_flight_id: 0,
        }
    }

    pub fn next_flight_id(&mut self) -> u64 {
        self.next_flight_id += 1;
        self.next_flight_id
    }

    /// 惰性回收：访问前若已过期则直接移除
    pub fn evict_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.entries.remove(key);
        }
        expired
    }

    pub fn collect_garbage(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorClass;

    fn entry_with_value(now: Instant) -> CacheEntry<u32> {
        let mut entry = CacheEntry::empty(
            "chapters/".to_string(),
            now,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        entry.value = Some(7);
        entry.fetched_at = Some(now);
        entry.state = EntryState::Fresh;
        entry
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_becomes_stale_after_window() {
        let now = Instant::now();
        let entry = entry_with_value(now);
        assert!(entry.is_fresh(now, Duration::from_secs(300)));
        assert_eq!(entry.effective_state(now), EntryState::Fresh);

        let later = now + Duration::from_secs(300);
        assert!(!entry.is_fresh(later, Duration::from_secs(300)));
        assert_eq!(entry.effective_state(later), EntryState::Stale);
        // 自定义窗口
        assert!(entry.is_fresh(later, Duration::from_secs(301)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_uses_gc_window() {
        let now = Instant::now();
        let entry = entry_with_value(now);
        assert!(!entry.is_expired(now + Duration::from_secs(600)));
        assert!(entry.is_expired(now + Duration::from_secs(601)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_without_result() {
        let now = Instant::now();
        let mut entry = entry_with_value(now);
        entry.state = EntryState::InFlight;
        assert_eq!(entry.settle_without_result(), Some(EntryState::Stale));

        let mut entry: CacheEntry<u32> =
            CacheEntry::empty("x".into(), now, Duration::ZERO, Duration::ZERO);
        entry.error = Some(NormalizedError::new(ErrorClass::Server, "down"));
        assert_eq!(entry.settle_without_result(), Some(EntryState::Error));

        let mut entry: CacheEntry<u32> =
            CacheEntry::empty("x".into(), now, Duration::ZERO, Duration::ZERO);
        assert_eq!(entry.settle_without_result(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_collect_garbage() {
        let now = Instant::now();
        let mut store = CacheStore::new();
        store.entries.insert("chapters/".to_string(), entry_with_value(now));
        assert_eq!(store.collect_garbage(now), 0);
        assert_eq!(store.collect_garbage(now + Duration::from_secs(601)), 1);
        assert!(store.entries.is_empty());
    }

    #[test]
    fn test_flight_shared_counts() {
        let shared = FlightShared::default();
        shared.join();
        shared.join();
        assert!(!shared.leave());
        assert!(shared.leave());
    }
}
