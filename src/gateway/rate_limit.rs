//! Process-wide spacing between LLM calls.
//!
//! One [`RateLimiter`] instance is shared by the whole gateway. The gate
//! holds its mutex across the wait, which gives two guarantees at once:
//! callers pass in arrival (FIFO) order, and no two call starts are ever
//! closer together than the configured spacing, regardless of which task
//! issued them. This is distinct from any per-client limiting an HTTP
//! surface might apply; do not conflate the two.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-spacing gate for LLM call starts.
pub struct RateLimiter {
    spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter enforcing `spacing` between consecutive call starts.
    /// `Duration::ZERO` disables waiting but keeps FIFO ordering.
    #[must_use]
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the spacing since the previous call start has elapsed,
    /// then claim the current instant as the new last call start.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.spacing;
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "rate limit gate waiting"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// The configured spacing.
    #[must_use]
    pub fn spacing(&self) -> Duration {
        self.spacing
    }
}
