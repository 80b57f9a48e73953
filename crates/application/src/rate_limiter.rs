use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 某个键在当前时间窗口内的配额
#[derive(Debug, Clone)]
struct Quota {
    count: u32,
    window_start: Instant,
}

impl Quota {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }
}

/// 限流错误类型
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded: {current}/{max} events per {window_secs}s")]
    RateLimitExceeded {
        current: u32,
        max: u32,
        window_secs: u64,
    },
}

/// 固定窗口限流器
///
/// 发送消息按用户限流，输入状态按（连接，会话）限流。
pub struct EventRateLimiter<K> {
    max_events: u32,
    window: Duration,
    quotas: Mutex<HashMap<K, Quota>>,
}

impl<K> EventRateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            quotas: Mutex::new(HashMap::new()),
        }
    }

    /// 检查并计数一次事件
    pub fn check(&self, key: &K) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut quotas = self
            .quotas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let quota = quotas.entry(key.clone()).or_insert_with(|| Quota::new(now));

        if now.duration_since(quota.window_start) >= self.window {
            *quota = Quota::new(now);
        }

        if quota.count >= self.max_events {
            return Err(RateLimitError::RateLimitExceeded {
                current: quota.count,
                max: self.max_events,
                window_secs: self.window.as_secs(),
            });
        }

        quota.count += 1;
        Ok(())
    }

    /// 连接断开后清理相关的键
    pub fn forget_where(&self, predicate: impl Fn(&K) -> bool) {
        let mut quotas = self
            .quotas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        quotas.retain(|key, _| !predicate(key));
    }

    /// 清理过期的配额记录（防止内存泄漏）
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.window;
        let mut quotas = self
            .quotas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        quotas.retain(|_, quota| now.duration_since(quota.window_start) < window * 2);
    }

    pub fn tracked_keys(&self) -> usize {
        self.quotas
            .lock()
            .map(|quotas| quotas.len())
            .unwrap_or_default()
    }
}
