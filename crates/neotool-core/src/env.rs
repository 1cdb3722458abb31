//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from wall-clock time. Production drivers use tokio's
//! timer, tests run the same code on tokio's paused clock.

use std::time::Duration;

/// Abstract environment providing time and an async sleep primitive.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - `sleep()` completes no earlier than `duration` after it was called
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only retry loops and drivers sleep; state transitions never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
