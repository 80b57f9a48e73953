use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone, Debug)]
pub enum Backoff {
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential {
            base,
            max: Duration::from_secs(30),
        }
    }

    pub fn capped(self, max: Duration) -> Self {
        match self {
            Backoff::Exponential { base, .. } => Backoff::Exponential { base, max },
        }
    }

    /// 第 `attempt` 次失败后的等待时间，从 1 开始计数
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base, max } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                std::cmp::min(base.saturating_mul(factor), *max)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(200)),
        }
    }
}

pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                let delay = config.backoff.delay_at(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_until_the_cap() {
        let backoff = Backoff::exponential(Duration::from_millis(100)).capped(Duration::from_secs(1));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_at(5), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(1)),
        };

        let result: Result<(), String> = retry_async(&config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        })
        .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(&RetryConfig::default(), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err("not yet".to_string())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
    }
}
