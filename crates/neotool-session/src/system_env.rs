//! Production environment backed by tokio's timer.
//!
//! Uses [`tokio::time::Instant`] rather than the std clock so that tests
//! running on tokio's paused clock observe the same time the retry loops
//! sleep against.

use std::time::Duration;

use neotool_core::Environment;

/// Production environment using tokio time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_clock() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_secs(10)).await;
        let elapsed = env.now() - start;

        assert!(elapsed >= Duration::from_secs(10), "Sleep should wait at least 10s");
    }
}
