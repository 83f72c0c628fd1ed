use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::{sleep, timeout, error::Elapsed};

use crate::error::TimeEntryError;

/// リトライ対象かどうかを判定できるエラー。
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for TimeEntryError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// `attempt`回目の失敗後に待つ時間を返す関数。
pub type Backoff = fn(attempt: u32, base_delay: Duration) -> Duration;

/// 線形バックオフ。`attempt × base_delay`だけ待つ。
pub fn linear_backoff(attempt: u32, base_delay: Duration) -> Duration {
    base_delay.saturating_mul(attempt)
}

/// リトライの方針。
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    /// 1回の試行の締め切り。超えた試行は一時的な失敗として数える。
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: linear_backoff,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt, self.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// `operation`を最大`max_attempts`回実行する。
///
/// リトライ対象外のエラーは即座に返す。最後の失敗はそのまま返す。
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: Retryable + From<Elapsed> + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match policy.attempt_timeout {
            Some(limit) => timeout(limit, operation())
                .await
                .unwrap_or_else(|elapsed| Err(E::from(elapsed))),
            None => operation().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                debug!(
                    "attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
