use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Delay applied between a failed loop iteration and the next attempt.
/// Retries are unbounded; only cancellation ends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep for the retry delay. Returns `false` if `shutdown` fired first.
    pub async fn wait(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waits_full_delay() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1000));
        let start = tokio::time::Instant::now();
        assert!(policy.wait(&CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_cuts_wait_short() {
        let policy = RetryPolicy::fixed(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();
        let start = tokio::time::Instant::now();
        assert!(!policy.wait(&token).await);
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
