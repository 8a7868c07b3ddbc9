use std::future::Future;
use std::thread;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Runs `action` up to `max_attempts` times, sleeping `delay` between failures.
/// Returns `default` once every attempt has failed.
pub fn retry<T, E, F>(max_attempts: usize, delay: Duration, default: T, mut action: F) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> std::result::Result<T, E>,
{
    let policy = RetryPolicy::new(max_attempts, delay);
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        match action() {
            Ok(value) => return value,
            Err(err) => {
                tracing::warn!("attempt {}/{} failed: {}", attempt, attempts, err);
                if attempt < attempts {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
    default
}

/// Returns true as soon as one attempt succeeds.
pub fn retry_void<E, F>(max_attempts: usize, delay: Duration, action: F) -> bool
where
    E: std::fmt::Display,
    F: FnMut() -> std::result::Result<(), E>,
{
    let mut action = action;
    retry(max_attempts, delay, false, || action().map(|_| true))
}

pub async fn retry_async<T, E, F, Fut>(policy: RetryPolicy, default: T, action: F) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    match try_with_retry_async(policy, action).await {
        Ok(value) => value,
        Err(_) => default,
    }
}

pub async fn retry_void_async<E, F, Fut>(policy: RetryPolicy, mut action: F) -> bool
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
{
    try_with_retry_async(policy, || action()).await.is_ok()
}

/// Same bound as [`retry_async`] but hands back the last error instead of a default.
pub async fn try_with_retry_async<T, E, F, Fut>(
    policy: RetryPolicy,
    action: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    try_with_retry_async_while(policy, |_| true, action).await
}

/// Like [`try_with_retry_async`], but an error `should_retry` rejects is returned at once.
pub async fn try_with_retry_async_while<T, E, P, F, Fut>(
    policy: RetryPolicy,
    should_retry: P,
    mut action: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if !should_retry(&err) => return Err(err),
            Err(err) if attempt >= attempts => {
                tracing::warn!("attempt {}/{} failed, giving up: {}", attempt, attempts, err);
                return Err(err);
            }
            Err(err) => {
                tracing::warn!("attempt {}/{} failed: {}", attempt, attempts, err);
                sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
